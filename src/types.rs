use std::fmt;

/// Una lectura del IMU: (time, acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Marca de tiempo tal como la envía el ESP32 (no entra en las features)
    pub time: f64,
    pub acc: [f32; 3],
    pub gyro: [f32; 3],
}

impl Sample {
    pub fn new(time: f64, acc: [f32; 3], gyro: [f32; 3]) -> Self {
        Self { time, acc, gyro }
    }

    /// Parsea una línea `time,ax,ay,az,gx,gy,gz`. Cualquier cosa que no sean
    /// exactamente 7 campos numéricos finitos se descarta (`NaN` e `inf`
    /// también cuentan como ruido).
    pub fn parse_line(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != LINE_FIELDS {
            return None;
        }

        let time = fields[0].parse::<f64>().ok().filter(|t| t.is_finite())?;
        let mut channels = [0.0f32; NUM_CHANNELS];
        for (slot, raw) in channels.iter_mut().zip(&fields[1..]) {
            *slot = raw.parse::<f32>().ok().filter(|v| v.is_finite())?;
        }

        Some(Self {
            time,
            acc: [channels[0], channels[1], channels[2]],
            gyro: [channels[3], channels[4], channels[5]],
        })
    }

    /// Los 6 canales del modelo en el orden de `FEATURE_CHANNELS`
    pub fn channels(&self) -> [f32; NUM_CHANNELS] {
        [
            self.acc[0],
            self.acc[1],
            self.acc[2],
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
        ]
    }

    /// Escribe los 6 canales en la fila `row` de un buffer plano [row * 6 + canal]
    pub fn to_flat_array(&self, output: &mut [f32], row: usize) {
        let base = row * NUM_CHANNELS;
        output[base..base + NUM_CHANNELS].copy_from_slice(&self.channels());
    }
}

/// Ráfaga de muestras entre START y END, en orden de llegada
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    samples: Vec<Sample>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<Sample>> for Session {
    fn from(samples: Vec<Sample>) -> Self {
        Self { samples }
    }
}

/// Clases con las que se entrenó el modelo, más el centinela `Unknown`
/// que devuelve el clasificador cuando falla.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Up,
    Down,
    Left,
    Right,
    Roll,
    Rotate,
    Neutral,
    Unknown,
}

impl Label {
    /// Todas las clases entrenadas (sin `Unknown`)
    pub const KNOWN: [Label; 7] = [
        Label::Up,
        Label::Down,
        Label::Left,
        Label::Right,
        Label::Roll,
        Label::Rotate,
        Label::Neutral,
    ];

    /// Convierte el nombre de clase que devuelve el modelo. Ignora mayúsculas
    /// y espacios; cualquier otro nombre es `Unknown`.
    pub fn parse(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        Self::KNOWN
            .iter()
            .copied()
            .find(|label| label.as_str() == name)
            .unwrap_or(Label::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Up => "up",
            Label::Down => "down",
            Label::Left => "left",
            Label::Right => "right",
            Label::Roll => "roll",
            Label::Rotate => "rotate",
            Label::Neutral => "neutral",
            Label::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marcadores de framing enviados por el ESP32
pub const START_MARKER: &str = "START";
pub const END_MARKER: &str = "END";

/// Constantes del sistema
pub const NUM_CHANNELS: usize = 6; // acc_x, acc_y, acc_z, gyro_x, gyro_y, gyro_z
pub const LINE_FIELDS: usize = NUM_CHANNELS + 1; // + time
pub const MAX_SAMPLES: usize = 401;
pub const FEATURE_LEN: usize = MAX_SAMPLES * NUM_CHANNELS; // 2406

/// Orden de columnas que recibe el modelo. Debe coincidir con el manifiesto
/// que acompaña al .onnx
pub const FEATURE_CHANNELS: [&str; NUM_CHANNELS] =
    ["acc_x", "acc_y", "acc_z", "gyro_x", "gyro_y", "gyro_z"];

/// Encabezado del CSV de sesión
pub const SESSION_HEADER: [&str; LINE_FIELDS] =
    ["time", "acc_x", "acc_y", "acc_z", "gyro_x", "gyro_y", "gyro_z"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_accepts_seven_numeric_fields() {
        let sample = Sample::parse_line("12, 0.5,-1,9.8,0.1,0.2,0.3").unwrap();
        assert_eq!(sample.time, 12.0);
        assert_eq!(sample.acc, [0.5, -1.0, 9.8]);
        assert_eq!(sample.gyro, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_line_rejects_wrong_field_count() {
        assert!(Sample::parse_line("1,2,3,4,5,6").is_none());
        assert!(Sample::parse_line("1,2,3,4,5,6,7,8").is_none());
        assert!(Sample::parse_line("").is_none());
    }

    #[test]
    fn test_parse_line_rejects_non_numeric() {
        assert!(Sample::parse_line("t,0,0,0,0,0,0").is_none());
        assert!(Sample::parse_line("1,0,0,x,0,0,0").is_none());
    }

    #[test]
    fn test_parse_line_rejects_non_finite() {
        assert!(Sample::parse_line("1,NaN,inf,0,0,0,0").is_none());
        assert!(Sample::parse_line("1,0,0,0,0,0,-infinity").is_none());
        assert!(Sample::parse_line("nan,0,0,0,0,0,0").is_none());
        assert!(Sample::parse_line("1,1e3,0,0,0,0,-2.5").is_some());
    }

    #[test]
    fn test_label_parse() {
        assert_eq!(Label::parse("up"), Label::Up);
        assert_eq!(Label::parse(" Rotate "), Label::Rotate);
        assert_eq!(Label::parse("NEUTRAL"), Label::Neutral);
        assert_eq!(Label::parse("bogus"), Label::Unknown);
        assert_eq!(Label::parse("Unknown"), Label::Unknown);
    }

    #[test]
    fn test_flat_row_layout() {
        let sample = Sample::new(0.0, [1.0, 2.0, 3.0], [4.0, 5.0, 6.0]);
        let mut flat = vec![0.0; 12];
        sample.to_flat_array(&mut flat, 1);
        assert_eq!(&flat[..6], &[0.0; 6]);
        assert_eq!(&flat[6..], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }
}
