//! Serial NMEA 0183 GPS position source
//!
//! Protocol:
//! - Line based ASCII, `$<talker>GGA,...*<checksum>\r\n`
//! - Checksum: XOR of all bytes between `$` and `*`, two hex digits
//! - Coordinates: ddmm.mmmm / dddmm.mmmm with N/S and E/W hemispheres
//! - Only GGA is used; quality 0 means no fix

use crate::infra::config::Config;
use crate::domain::types::PositionFix;
use crate::services::engine::EngineHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

/// Delay before retrying a device that failed to open
const REOPEN_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NmeaError {
    #[error("sentence has no checksum")]
    MissingChecksum,
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    BadChecksum { expected: u8, computed: u8 },
    #[error("not a GGA sentence")]
    NotGga,
    #[error("malformed field: {0}")]
    Malformed(&'static str),
}

/// Fields of a GGA sentence with a valid position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaFix {
    pub lat: f64,
    pub lon: f64,
    pub quality: u8,
    pub satellites: u8,
    pub hdop: f64,
}

/// Validate the checksum and return the sentence body between `$` and `*`
fn checked_body(line: &str) -> Result<&str, NmeaError> {
    let line = line.trim();
    let line = line.strip_prefix('$').ok_or(NmeaError::Malformed("start"))?;
    let (body, checksum) = line.split_once('*').ok_or(NmeaError::MissingChecksum)?;

    let expected = hex::decode(checksum.trim())
        .ok()
        .and_then(|bytes| bytes.first().copied())
        .ok_or(NmeaError::Malformed("checksum"))?;
    let computed = body.bytes().fold(0u8, |acc, b| acc ^ b);
    if expected != computed {
        return Err(NmeaError::BadChecksum { expected, computed });
    }
    Ok(body)
}

/// Convert ddmm.mmmm (or dddmm.mmmm) plus hemisphere into signed degrees
fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Result<f64, NmeaError> {
    if !value.is_ascii() || value.len() < degree_digits + 2 {
        return Err(NmeaError::Malformed("coordinate"));
    }
    let (degrees, minutes) = match (value.get(..degree_digits), value.get(degree_digits..)) {
        (Some(d), Some(m)) => (d, m),
        _ => return Err(NmeaError::Malformed("coordinate")),
    };
    let degrees: f64 = degrees.parse().map_err(|_| NmeaError::Malformed("degrees"))?;
    let minutes: f64 = minutes.parse().map_err(|_| NmeaError::Malformed("minutes"))?;
    let magnitude = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(magnitude),
        "S" | "W" => Ok(-magnitude),
        _ => Err(NmeaError::Malformed("hemisphere")),
    }
}

/// Parse a GGA sentence; `Ok(None)` when the receiver reports no fix
pub fn parse_gga(line: &str) -> Result<Option<GgaFix>, NmeaError> {
    let body = checked_body(line)?;
    let fields: Vec<&str> = body.split(',').collect();

    // Any talker id: GP, GN, GL, GA, ...
    if fields.first().map_or(true, |id| id.len() != 5 || !id.ends_with("GGA")) {
        return Err(NmeaError::NotGga);
    }
    if fields.len() < 9 {
        return Err(NmeaError::Malformed("field count"));
    }

    let quality: u8 = fields[6].parse().map_err(|_| NmeaError::Malformed("quality"))?;
    if quality == 0 || fields[2].is_empty() || fields[4].is_empty() {
        return Ok(None);
    }

    let lat = parse_coordinate(fields[2], fields[3], 2)?;
    let lon = parse_coordinate(fields[4], fields[5], 3)?;
    let satellites = fields[7].parse().unwrap_or(0);
    let hdop: f64 = fields[8].parse().map_err(|_| NmeaError::Malformed("hdop"))?;

    Ok(Some(GgaFix { lat, lon, quality, satellites, hdop }))
}

pub struct GpsReader {
    device: String,
    baud: u32,
    uere_m: f64,
    engine: EngineHandle,
}

impl GpsReader {
    pub fn new(config: &Config, engine: EngineHandle) -> Self {
        Self {
            device: config.gps_device().to_string(),
            baud: config.gps_baud(),
            uere_m: config.gps_uere_m(),
            engine,
        }
    }

    /// Fix from a GGA sentence stamped with engine time
    fn to_fix(&self, gga: &GgaFix) -> PositionFix {
        PositionFix::new(gga.lat, gga.lon, self.engine.now_ms(), gga.hdop * self.uere_m)
    }

    /// Read sentences until shutdown, reopening the device on failure
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(device = %self.device, baud = %self.baud, uere_m = %self.uere_m, "gps_reader_started");

        loop {
            let port = match tokio_serial::new(&self.device, self.baud).open_native_async() {
                Ok(p) => {
                    info!(device = %self.device, "gps_port_opened");
                    p
                }
                Err(e) => {
                    error!(device = %self.device, error = %e, "gps_port_open_failed");
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("gps_shutdown");
                                return;
                            }
                        }
                        _ = tokio::time::sleep(REOPEN_DELAY) => {}
                    }
                    continue;
                }
            };

            let mut lines = BufReader::new(port).lines();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("gps_shutdown");
                            return;
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => self.handle_line(&line),
                            Ok(None) => {
                                warn!(device = %self.device, "gps_port_closed");
                                break;
                            }
                            Err(e) => {
                                warn!(device = %self.device, error = %e, "gps_read_error");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_line(&self, line: &str) {
        match parse_gga(line) {
            Ok(Some(gga)) => {
                let fix = self.to_fix(&gga);
                debug!(
                    position = %fix.position,
                    hdop = %gga.hdop,
                    satellites = %gga.satellites,
                    "gps_fix"
                );
                self.engine.submit_fix(fix, "gps");
            }
            Ok(None) => debug!("gps_no_fix"),
            Err(NmeaError::NotGga) => {}
            Err(e) => debug!(error = %e, "gps_sentence_rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;
    use crate::infra::metrics::Metrics;
    use crate::services::engine::{engine_channel, Command};
    use std::sync::Arc;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn with_checksum(body: &str) -> String {
        let cs = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}", body, cs)
    }

    #[test]
    fn test_parse_reference_sentence() {
        let gga = parse_gga(GGA).unwrap().unwrap();
        assert!((gga.lat - 48.1173).abs() < 1e-9);
        assert!((gga.lon - (11.0 + 31.0 / 60.0)).abs() < 1e-9);
        assert_eq!(gga.quality, 1);
        assert_eq!(gga.satellites, 8);
        assert_eq!(gga.hdop, 0.9);
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let line = with_checksum("GNGGA,000000,3351.000,S,15112.000,W,2,10,1.2,10.0,M,0.0,M,,");
        let gga = parse_gga(&line).unwrap().unwrap();
        assert!((gga.lat + 33.85).abs() < 1e-9);
        assert!((gga.lon + 151.2).abs() < 1e-9);
    }

    #[test]
    fn test_bad_checksum() {
        let line = GGA.replace("*47", "*48");
        assert!(matches!(parse_gga(&line), Err(NmeaError::BadChecksum { expected: 0x48, .. })));
        assert_eq!(parse_gga("$GPGGA,123519,4807.038,N"), Err(NmeaError::MissingChecksum));
    }

    #[test]
    fn test_non_ascii_coordinate_rejected() {
        let line = with_checksum("GPGGA,123519,€0.000,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(parse_gga(&line), Err(NmeaError::Malformed("coordinate")));

        let line = with_checksum("GPGGA,123519,4807.038,N,0€131.00,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(parse_gga(&line), Err(NmeaError::Malformed("coordinate")));
    }

    #[test]
    fn test_no_fix_and_other_sentences() {
        let no_fix = with_checksum("GPGGA,123519,,,,,0,00,,,M,,M,,");
        assert_eq!(parse_gga(&no_fix), Ok(None));

        let rmc = with_checksum("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W");
        assert_eq!(parse_gga(&rmc), Err(NmeaError::NotGga));
    }

    #[test]
    fn test_reader_submits_fix_with_hdop_accuracy() {
        let clock = Arc::new(ManualClock::new(7_000));
        let (engine, mut command_rx) = engine_channel(4, clock, Arc::new(Metrics::new()));
        let config = Config::default();
        let reader = GpsReader::new(&config, engine);

        reader.handle_line(GGA);
        match command_rx.try_recv().unwrap() {
            Command::Fix(fix) => {
                assert_eq!(fix.timestamp_ms, 7_000);
                // HDOP 0.9 * default UERE 5 m
                assert!((fix.accuracy_meters - 4.5).abs() < 1e-9);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(command_rx.try_recv().is_err());
    }
}
