use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use compositor::gpu::wrap_fragment;
use compositor::probe::PROBE_SHADER;
use compositor::{EffectKind, EffectRegistry, ResolvedParams};
use shaderprep::{preprocess, DefineSet, FragmentTable, ShaderLoader, ShaderRequest};

use crate::cli::CheckShadersArgs;

struct Check {
    owner: String,
    request: ShaderRequest,
    defines: DefineSet,
}

pub fn run(args: CheckShadersArgs) -> Result<()> {
    let loader = ShaderLoader::open(&args.shaders)
        .with_context(|| format!("failed to open shader directory {}", args.shaders.display()))?;
    let mut failures = 0usize;

    for problem in loader.manifest().validate(loader.root()) {
        println!("  missing  {problem}");
        failures += 1;
    }

    let checks = builtin_checks();
    let mut covered = BTreeSet::new();
    for check in &checks {
        covered.insert(check.request.fragment.clone());
        covered.extend(check.request.includes.iter().map(|(_, logical)| logical.clone()));
        match check_program(&loader, check) {
            Ok(lines) => println!(
                "  ok       {:<12} {} ({lines} lines)",
                check.owner, check.request.fragment
            ),
            Err(err) => {
                failures += 1;
                println!("  error    {:<12} {}: {err:#}", check.owner, check.request.fragment);
            }
        }
    }

    // Manifest entries no effect asks for still have to preprocess on their own.
    let standalone: Vec<String> = loader
        .manifest()
        .logical_paths()
        .filter(|logical| !covered.contains(*logical))
        .map(str::to_string)
        .collect();
    for logical in standalone {
        let result = loader
            .load_blocking(&ShaderRequest::new(logical.clone()))
            .map_err(anyhow::Error::from)
            .and_then(|shader| {
                Ok(preprocess(&shader.source, &DefineSet::new(), &FragmentTable::empty())?)
            });
        match result {
            Ok(_) => println!("  ok       {:<12} {logical}", "-"),
            Err(err) => {
                failures += 1;
                println!("  error    {:<12} {logical}: {err:#}", "-");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} shader check(s) failed in {}", args.shaders.display());
    }
    tracing::info!(shaders = %args.shaders.display(), "all shaders passed");
    Ok(())
}

/// The probe program plus every built-in GPU effect with default parameters.
fn builtin_checks() -> Vec<Check> {
    let mut checks = vec![Check {
        owner: "probe".to_string(),
        request: ShaderRequest::new(PROBE_SHADER),
        defines: DefineSet::new(),
    }];
    let registry = EffectRegistry::builtin();
    let defaults = ResolvedParams::default();
    for name in registry.names() {
        if let Some(EffectKind::Gpu(effect)) = registry.create(name) {
            checks.push(Check {
                owner: name.to_string(),
                request: effect.shader(),
                defines: effect.defines(&defaults),
            });
        }
    }
    checks
}

/// Loads, preprocesses and wraps one program; returns its preprocessed line count.
fn check_program(loader: &ShaderLoader, check: &Check) -> Result<usize> {
    let shader = loader.load_blocking(&check.request)?;
    let source = preprocess(&shader.source, &check.defines, &shader.fragments)?;
    wrap_fragment(&source).map_err(anyhow::Error::msg)?;
    Ok(source.lines().count())
}
