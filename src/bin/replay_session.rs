use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use gesture_pilot::classifier::{Classifier, ModelManifest, OnnxModel};
use gesture_pilot::config::PilotConfig;
use gesture_pilot::dispatcher::DroneCommand;
use gesture_pilot::features::FeatureNormalizer;
use gesture_pilot::session_log::load_session;
use gesture_pilot::types::NUM_CHANNELS;

const USAGE: &str =
    "Uso: replay_session [--dump-features] [--model FILE] [--manifest FILE] <sesion.csv>";

struct ReplayOptions {
    dump_features: bool,
    model: Option<PathBuf>,
    manifest: Option<PathBuf>,
}

fn parse_args() -> Result<(PathBuf, ReplayOptions)> {
    let mut opts = ReplayOptions {
        dump_features: false,
        model: None,
        manifest: None,
    };
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dump-features" => opts.dump_features = true,
            "--model" => opts.model = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into()),
            "--manifest" => {
                opts.manifest = Some(args.next().ok_or_else(|| anyhow!(USAGE))?.into())
            }
            _ => {
                if csv_path.is_some() || arg.starts_with("--") {
                    bail!(USAGE);
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV"))?;
    Ok((csv_path, opts))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let (csv_path, opts) = parse_args()?;
    println!("🎞️  Reproduciendo sesión desde {:?}", csv_path);

    let mut config = PilotConfig::default();
    if let Some(model) = opts.model {
        config.model_path = model;
    }
    if opts.manifest.is_some() {
        config.manifest_path = opts.manifest;
    }

    let session = load_session(&csv_path)?;
    let manifest = ModelManifest::load(config.manifest_path())
        .with_context(|| format!("No se pudo cargar {:?}", config.manifest_path()))?;
    let normalizer = FeatureNormalizer::new(manifest.max_samples);
    let features = normalizer.normalize(&session);

    if session.len() > manifest.max_samples {
        println!(
            "ℹ️  Sesión recortada: {} → {} muestras",
            session.len(),
            manifest.max_samples
        );
    } else {
        println!(
            "ℹ️  {} muestras, {} filas de relleno",
            session.len(),
            manifest.max_samples - session.len()
        );
    }

    let mut classifier = Classifier::new(OnnxModel::load(&config.model_path, &manifest)?);

    let mut scores = classifier.scores(&features)?;
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    let prediction = classifier.try_predict(&features)?;

    println!(
        "\n🥇 Gesto: {} (clase '{}', score {:.3})",
        prediction.label, prediction.class_name, prediction.score
    );
    match DroneCommand::for_label(prediction.label) {
        Some(command) => println!("🚁 Orden: {}", command),
        None => println!("⚠️  Gesto sin orden asociada, el dron no haría nada"),
    }

    println!("\nPuntuaciones:");
    for (idx, (label, score)) in scores.iter().enumerate() {
        println!("  {:>2}. {:<12} {:>9.4}", idx + 1, label, score);
    }

    if opts.dump_features {
        println!("\n📊 {} features (fila, canal):", features.len());
        for (idx, value) in features.as_slice().iter().enumerate() {
            println!(
                "  {:03}.{}: {:>12.6}",
                idx / NUM_CHANNELS,
                idx % NUM_CHANNELS,
                value
            );
        }
    }

    Ok(())
}
