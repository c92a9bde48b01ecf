//! Ordered list of effect instances with their flags and configuration.
use crate::effect::EffectKind;
use crate::param::EffectConfig;
use crate::types::EffectId;

pub struct EffectInstance {
    pub id: EffectId,
    /// Registry name the instance was created from.
    pub type_name: String,
    pub config: EffectConfig,
    pub enabled: bool,
    pub solo: bool,
    pub kind: EffectKind,
}

#[derive(Default)]
pub struct EffectStack {
    effects: Vec<EffectInstance>,
    next_id: u64,
}

impl EffectStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an enabled, non-solo instance and returns its new id.
    pub fn push(&mut self, type_name: impl Into<String>, kind: EffectKind, config: EffectConfig) -> EffectId {
        self.next_id += 1;
        let id = EffectId(self.next_id);
        self.effects.push(EffectInstance {
            id,
            type_name: type_name.into(),
            config,
            enabled: true,
            solo: false,
            kind,
        });
        id
    }

    pub fn remove(&mut self, id: EffectId) -> Option<EffectInstance> {
        let index = self.position(id)?;
        Some(self.effects.remove(index))
    }

    /// Moves `id` to `index`, clamped to the end of the stack.
    pub fn move_to(&mut self, id: EffectId, index: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let effect = self.effects.remove(from);
        let to = index.min(self.effects.len());
        self.effects.insert(to, effect);
        true
    }

    pub fn position(&self, id: EffectId) -> Option<usize> {
        self.effects.iter().position(|effect| effect.id == id)
    }

    pub fn get(&self, id: EffectId) -> Option<&EffectInstance> {
        self.effects.iter().find(|effect| effect.id == id)
    }

    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectInstance> {
        self.effects.iter_mut().find(|effect| effect.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectInstance> {
        self.effects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EffectInstance> {
        self.effects.iter_mut()
    }

    pub fn ids(&self) -> Vec<EffectId> {
        self.effects.iter().map(|effect| effect.id).collect()
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Removes every instance, in stack order.
    pub fn drain(&mut self) -> Vec<EffectInstance> {
        std::mem::take(&mut self.effects)
    }

    pub fn any_solo(&self) -> bool {
        self.effects.iter().any(|effect| effect.enabled && effect.solo)
    }

    /// Enabled and, when any enabled effect is solo, solo itself.
    pub fn effective_enabled(&self) -> Vec<bool> {
        let solo = self.any_solo();
        self.effects
            .iter()
            .map(|effect| effect.enabled && (!solo || effect.solo))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::Invert;

    fn stack_of(n: usize) -> (EffectStack, Vec<EffectId>) {
        let mut stack = EffectStack::new();
        let ids = (0..n)
            .map(|_| stack.push("invert", EffectKind::Cpu(Box::new(Invert)), EffectConfig::new()))
            .collect();
        (stack, ids)
    }

    #[test]
    fn ids_are_unique_after_removal() {
        let (mut stack, ids) = stack_of(2);
        stack.remove(ids[1]);
        let next = stack.push("invert", EffectKind::Cpu(Box::new(Invert)), EffectConfig::new());
        assert!(!ids.contains(&next));
    }

    #[test]
    fn move_clamps_to_end() {
        let (mut stack, ids) = stack_of(3);
        assert!(stack.move_to(ids[0], 10));
        assert_eq!(stack.ids(), vec![ids[1], ids[2], ids[0]]);
        assert!(stack.move_to(ids[0], 0));
        assert_eq!(stack.ids(), ids);
        assert!(!stack.move_to(EffectId(99), 0));
    }

    #[test]
    fn solo_narrows_the_effective_set() {
        let (mut stack, ids) = stack_of(3);
        assert_eq!(stack.effective_enabled(), vec![true, true, true]);

        stack.get_mut(ids[1]).unwrap().solo = true;
        assert_eq!(stack.effective_enabled(), vec![false, true, false]);

        stack.get_mut(ids[1]).unwrap().enabled = false;
        assert_eq!(stack.effective_enabled(), vec![true, false, true]);
    }
}
