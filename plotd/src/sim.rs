//! Deterministic controller simulator.
//!
//! Answers commands from a fixed prefix table, so tests and `devMode`
//! runs behave identically on every host. Unknown commands acknowledge
//! with a bare `ok`, matching permissive firmware.

/// Synthesize the response lines for one command.
pub fn respond(command: &str) -> Vec<String> {
    let trimmed = command.trim();
    let mut words = trimmed.split_whitespace();
    let head = words
        .next()
        .map(|w| w.to_ascii_uppercase())
        .unwrap_or_default();

    match head.as_str() {
        // Position report in the controller's native shape.
        "M114" => vec![
            "X:100.00 Y:50.00 Z:10.00 E:0.00 Count X:8000 Y:4000 Z:800".to_string(),
            "ok".to_string(),
        ],
        "M20" => vec![
            "Begin file list".to_string(),
            "PLOT~1.GCO 2048".to_string(),
            "STARS~1.GCO 5120".to_string(),
            "End file list".to_string(),
            "ok".to_string(),
        ],
        "M39" => vec![
            "SD card: 3965MB total, 128MB used".to_string(),
            "ok".to_string(),
        ],
        "M23" => {
            let name = words.next().unwrap_or("NOFILE");
            vec![
                format!("File opened: {name}"),
                "File selected".to_string(),
                "ok".to_string(),
            ]
        }
        "M28" => {
            let name = words.next().unwrap_or("NOFILE");
            vec![format!("Writing to file: {name}"), "ok".to_string()]
        }
        "M29" => vec!["Done saving file".to_string()],
        // Homing reports the origin.
        "G28" => vec![
            "X:0.00 Y:0.00 Z:0.00 E:0.00".to_string(),
            "ok".to_string(),
        ],
        "M42" => {
            let has_s = trimmed
                .to_ascii_uppercase()
                .split_whitespace()
                .any(|w| w.starts_with('S'));
            if has_s {
                vec!["ok".to_string()]
            } else {
                let pin = trimmed
                    .to_ascii_uppercase()
                    .split_whitespace()
                    .find_map(|w| w.strip_prefix('P').map(str::to_string))
                    .unwrap_or_else(|| "0".to_string());
                vec![format!("Pin {pin}: 0"), "ok".to_string()]
            }
        }
        // Motion, stream control, and everything else acknowledge.
        _ => vec!["ok".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_query_reports_the_canned_pose() {
        let lines = respond("M114");
        assert!(lines[0].contains("X:100.00"));
        assert!(lines[0].contains("Y:50.00"));
        assert!(lines[0].contains("Z:10.00"));
        assert_eq!(lines.last().unwrap(), "ok");
    }

    #[test]
    fn file_list_is_bracketed() {
        let lines = respond("M20");
        assert_eq!(lines.first().unwrap(), "Begin file list");
        assert!(lines.iter().any(|l| l.contains("PLOT~1.GCO")));
        assert!(lines.iter().any(|l| l == "End file list"));
    }

    #[test]
    fn file_select_echoes_the_name() {
        let lines = respond("M23 STARS~1.GCO");
        assert!(lines[0].contains("STARS~1.GCO"));
    }

    #[test]
    fn save_terminates_with_done() {
        assert_eq!(respond("M29"), vec!["Done saving file".to_string()]);
    }

    #[test]
    fn pin_write_acknowledges_and_pin_read_reports() {
        assert_eq!(respond("M42 P2 S255"), vec!["ok".to_string()]);
        let read = respond("M42 P13");
        assert!(read[0].starts_with("Pin 13:"));
    }

    #[test]
    fn motion_and_unknown_commands_acknowledge() {
        assert_eq!(respond("G0 X10 Y10"), vec!["ok".to_string()]);
        assert_eq!(respond("G1 X10 Y10 F3000"), vec!["ok".to_string()]);
        assert_eq!(respond("M867"), vec!["ok".to_string()]);
    }
}
