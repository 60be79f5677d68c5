use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No se pudo leer la configuración {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuración inválida: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No se indicó el puerto del ESP32")]
    MissingPort,

    #[error("Valor inválido para '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Configuración del piloto. Todos los campos tienen valor por defecto;
/// el puerto suele venir por línea de comandos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Timeout de cada lectura del puerto. No limita la duración de una
    /// sesión: al expirar se sigue esperando.
    pub read_timeout_ms: u64,
    pub model_path: PathBuf,
    /// Por defecto, el modelo con extensión .json
    pub manifest_path: Option<PathBuf>,
    /// CSV de la sesión en curso; `null` lo desactiva
    pub session_log: Option<PathBuf>,
    pub drone: DroneConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            model_path: PathBuf::from("drone_gesture_model.onnx"),
            manifest_path: None,
            session_log: Some(PathBuf::from("imu_data.csv")),
            drone: DroneConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: PilotConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Un timeout de 0 ms no es válido para los sockets ni el puerto serie
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "baud_rate",
                reason: "debe ser > 0",
            });
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "read_timeout_ms",
                reason: "debe ser > 0",
            });
        }
        self.drone.validate()
    }

    pub fn port(&self) -> Result<&str, ConfigError> {
        self.port
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(ConfigError::MissingPort)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.model_path.with_extension("json"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    /// Dirección de comandos del Tello
    pub address: String,
    /// Dirección local del socket UDP
    pub bind: String,
    /// Tiempo máximo de espera de la respuesta a cada comando
    pub command_timeout_ms: u64,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            address: "192.168.10.1:8889".to_string(),
            bind: "0.0.0.0:0".to_string(),
            command_timeout_ms: 10_000,
        }
    }
}

impl DroneConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "drone.command_timeout_ms",
                reason: "debe ser > 0 (cada orden espera su respuesta)",
            });
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PilotConfig::from_json("{}").unwrap();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.session_log, Some(PathBuf::from("imu_data.csv")));
        assert_eq!(config.manifest_path(), PathBuf::from("drone_gesture_model.json"));
        assert_eq!(config.drone.address, "192.168.10.1:8889");
        assert!(matches!(config.port(), Err(ConfigError::MissingPort)));
    }

    #[test]
    fn test_overrides() {
        let config = PilotConfig::from_json(
            r#"{
                "port": "/dev/ttyUSB0",
                "model_path": "models/svm.onnx",
                "session_log": null,
                "drone": {"command_timeout_ms": 500}
            }"#,
        )
        .unwrap();

        assert_eq!(config.port().unwrap(), "/dev/ttyUSB0");
        assert_eq!(config.session_log, None);
        assert_eq!(config.manifest_path(), PathBuf::from("models/svm.json"));
        assert_eq!(config.drone.command_timeout(), Duration::from_millis(500));
        assert_eq!(config.drone.bind, "0.0.0.0:0");
    }

    #[test]
    fn test_blank_port_is_missing() {
        let config = PilotConfig::from_json(r#"{"port": "  "}"#).unwrap();
        assert!(config.port().is_err());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let err = PilotConfig::from_json(r#"{"drone": {"command_timeout_ms": 0}}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "drone.command_timeout_ms",
                ..
            }
        ));
        assert!(err.to_string().contains("command_timeout_ms"));

        assert!(matches!(
            PilotConfig::from_json(r#"{"read_timeout_ms": 0}"#),
            Err(ConfigError::Invalid { field: "read_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(PilotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_load_reports_path() {
        let err = PilotConfig::load("/no/such/pilot.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
