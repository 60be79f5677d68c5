/*
Gesture Pilot - control de un Tello con gestos IMU + ONNX

Sistema que:
1. Lee por serie las muestras IMU del ESP32 (acc + gyro), enmarcadas entre START y END
2. Normaliza cada gesto a un vector fijo de 401 x 6 valores
3. Clasifica el gesto con el modelo ONNX exportado del SVM
4. Traduce el gesto a una orden del dron (subir, bajar, izquierda, derecha, flip, giro, mantener)

El dron despega al arrancar y aterriza siempre al salir (Ctrl+C o fallo del puerto).

Para ejecutar:
     RUST_LOG=info ./target/release/gesture-pilot /dev/ttyUSB0
     ./target/release/gesture-pilot --config pilot.json
Sin dron (sólo registra las órdenes):
     ./target/release/gesture-pilot --dry-run /dev/ttyUSB0
*/

use anyhow::{bail, Context, Result};
use crossbeam_channel::Receiver;
use std::env;
use std::path::PathBuf;

use gesture_pilot::actuator::{Actuator, DryRunActuator, TelloActuator};
use gesture_pilot::classifier::{Classifier, ModelManifest, OnnxModel};
use gesture_pilot::config::PilotConfig;
use gesture_pilot::controller::{Phase, SessionController};
use gesture_pilot::features::FeatureNormalizer;
use gesture_pilot::session_log::SessionRecorder;
use gesture_pilot::transport::{open_serial, shutdown_channel, spawn_reader, ChannelLineSource};

const LINE_QUEUE: usize = 256;

struct CliArgs {
    config: Option<PathBuf>,
    port: Option<String>,
    dry_run: bool,
}

fn parse_args() -> Result<CliArgs> {
    let usage = "Uso: gesture-pilot [--config FILE] [--dry-run] [PUERTO]";
    let mut config = None;
    let mut port = None;
    let mut dry_run = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().with_context(|| usage.to_string())?;
                config = Some(PathBuf::from(path));
            }
            "--dry-run" => dry_run = true,
            "-h" | "--help" => {
                println!("{}", usage);
                std::process::exit(0);
            }
            _ => {
                if port.is_some() || arg.starts_with("--") {
                    bail!(usage);
                }
                port = Some(arg);
            }
        }
    }

    Ok(CliArgs {
        config,
        port,
        dry_run,
    })
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("🎯 Gesture Pilot - IMU + ONNX + Tello\n");

    let args = parse_args()?;
    let mut config = match &args.config {
        Some(path) => PilotConfig::load(path)?,
        None => PilotConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    let port = config.port()?.to_string();

    // Todo lo que puede fallar va antes del despegue
    println!("🔧 Cargando modelo {}...", config.model_path.display());
    let manifest_path = config.manifest_path();
    let manifest = ModelManifest::load(&manifest_path)
        .with_context(|| format!("No se pudo cargar el manifiesto {:?}", manifest_path))?;
    let model = OnnxModel::load(&config.model_path, &manifest)
        .with_context(|| format!("No se pudo cargar el modelo {:?}", config.model_path))?;
    let normalizer = FeatureNormalizer::new(manifest.max_samples);
    println!("✅ Clasificador cargado ({} clases)\n", model.labels().len());

    let serial = open_serial(&port, config.baud_rate, config.read_timeout())
        .with_context(|| format!("No se pudo abrir el puerto {}", port))?;
    println!("✅ Conectado al ESP32 en {}", port);

    let recorder = match &config.session_log {
        Some(path) => match SessionRecorder::create(path) {
            Ok(recorder) => Some(recorder),
            Err(e) => {
                log::warn!("Sin registro de sesión: {}", e);
                None
            }
        },
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("No se pudo instalar el handler de Ctrl+C")?;

    let mut source = ChannelLineSource::new(spawn_reader(serial, LINE_QUEUE), shutdown_rx.clone());
    let classifier = Classifier::new(model);
    let pilot = Pilot {
        classifier,
        normalizer,
        recorder,
        shutdown: shutdown_rx,
    };

    if args.dry_run {
        println!("🔧 Modo: DRY-RUN (sin dron)\n");
        fly(DryRunActuator::new(), pilot, &mut source)
    } else {
        println!("🔧 Modo: Tello en {}\n", config.drone.address);
        let drone = TelloActuator::new(&config.drone).context("No se pudo abrir el socket del Tello")?;
        fly(drone, pilot, &mut source)
    }
}

/// Todo lo que el controlador necesita salvo el dron
struct Pilot {
    classifier: Classifier<OnnxModel>,
    normalizer: FeatureNormalizer,
    recorder: Option<SessionRecorder>,
    shutdown: Receiver<()>,
}

fn fly<A: Actuator>(drone: A, pilot: Pilot, source: &mut ChannelLineSource) -> Result<()> {
    let mut controller = SessionController::new(drone, pilot.classifier, pilot.normalizer)
        .with_shutdown(pilot.shutdown);
    if let Some(recorder) = pilot.recorder {
        controller = controller.with_session_log(recorder);
    }

    println!("🎬 Despegando. Ctrl+C para aterrizar y salir.\n");
    let report = controller.run(source)?;

    println!(
        "\n👋 {} gestos procesados ({} ejecutados, {} fallidos). Aterrizaje: {}",
        report.sessions,
        report.dispatch.executed,
        report.dispatch.failed,
        match (report.exit_phase, report.landed) {
            (Phase::Idle, _) => "no despegó",
            (_, true) => "ok",
            (_, false) => "con errores",
        }
    );
    Ok(())
}
