//! Text scraping of human-formatted CLI output.
//!
//! `nbfc status -a`, `sensors` and `nbfc config -r` have no machine-readable
//! mode, so everything that depends on their layout lives here and is pinned
//! by tests against literal sample outputs.

use regex::Regex;
use std::sync::LazyLock;

static TEMPERATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Temperature[ \t]*:[ \t]*(\d+(?:\.\d*)?)").expect("valid temperature regex")
});

static FAN_SPEED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Current Fan Speed[ \t]*:[ \t]*(\d+(?:\.\d*)?)").expect("valid fan speed regex")
});

static CONFIG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)Selected Config Name[ \t]*:[ \t]*(.*?)\r?$").expect("valid config name regex")
});

static POWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"power1:[ \t]*(\d+(?:\.\d+)?)[ \t]*W").expect("valid power regex")
});

/// Fields scraped from `nbfc status -a`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NbfcStatus {
    pub temperature_celsius: Option<f64>,
    pub fan_speed_percent: Option<f64>,
    pub config_name: Option<String>,
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1)?.as_str().parse::<f64>().ok()
}

/// Scrape temperature, fan speed and selected config from `nbfc status -a`.
/// Each field is extracted independently.
pub fn parse_nbfc_status(output: &str) -> NbfcStatus {
    let config_name = CONFIG_NAME_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty());

    NbfcStatus {
        temperature_celsius: capture_number(&TEMPERATURE_RE, output),
        fan_speed_percent: capture_number(&FAN_SPEED_RE, output),
        config_name,
    }
}

/// Scrape the package power draw (`power1: <n> W`) from `sensors`
pub fn parse_sensors_power(output: &str) -> Option<f64> {
    capture_number(&POWER_RE, output)
}

/// Pick the config name out of `nbfc config -r`, skipping header and error lines
pub fn parse_recommended_config(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| {
            let lower = line.to_lowercase();
            !lower.contains("error")
                && !lower.contains("found")
                && !lower.contains("config")
                && !lower.contains("recommend")
                && !line.starts_with('-')
                && !line.starts_with('[')
        })
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NBFC_STATUS_SAMPLE: &str = "\
Read-only               : false
Selected Config Name    : HP Pavilion Gaming Laptop 15-ec1xxx
Temperature             : 62.5

Fan Display Name        : CPU Fan
Auto Control Enabled    : true
Critical Mode Enabled   : false
Temperature Algorithm Type : Average
Current Fan Speed       : 40
Target Fan Speed        : 40.00
Speed Steps             : 55
";

    const SENSORS_SAMPLE: &str = "\
amdgpu-pci-0400
Adapter: PCI adapter
vddgfx:        1.35 V
vddnb:       981.00 mV
edge:         +58.0°C
PPT:          18.30 W
power1:       18.30 W

k10temp-pci-00c3
Adapter: PCI adapter
Tctl:         +62.4°C
";

    #[test]
    fn test_parse_full_nbfc_status() {
        let status = parse_nbfc_status(NBFC_STATUS_SAMPLE);
        assert_eq!(status.temperature_celsius, Some(62.5));
        assert_eq!(status.fan_speed_percent, Some(40.0));
        assert_eq!(
            status.config_name.as_deref(),
            Some("HP Pavilion Gaming Laptop 15-ec1xxx")
        );
    }

    #[test]
    fn test_parse_nbfc_status_fields_are_independent() {
        let status = parse_nbfc_status("Current Fan Speed : 75.5\n");
        assert_eq!(status.temperature_celsius, None);
        assert_eq!(status.fan_speed_percent, Some(75.5));
        assert_eq!(status.config_name, None);
    }

    #[test]
    fn test_parse_nbfc_status_malformed_numbers() {
        let status = parse_nbfc_status("Temperature : hot\nCurrent Fan Speed : -\n");
        assert_eq!(status.temperature_celsius, None);
        assert_eq!(status.fan_speed_percent, None);
    }

    #[test]
    fn test_parse_nbfc_status_without_space_before_colon() {
        let status = parse_nbfc_status("Temperature: 55\r\nSelected Config Name: Quiet\r\n");
        assert_eq!(status.temperature_celsius, Some(55.0));
        assert_eq!(status.config_name.as_deref(), Some("Quiet"));
    }

    #[test]
    fn test_parse_nbfc_status_empty_config_name() {
        let status = parse_nbfc_status("Selected Config Name    :\nTemperature : 40.0\n");
        assert_eq!(status.config_name, None);
        assert_eq!(status.temperature_celsius, Some(40.0));
    }

    #[test]
    fn test_parse_nbfc_status_empty_output() {
        assert_eq!(parse_nbfc_status(""), NbfcStatus::default());
    }

    #[test]
    fn test_parse_sensors_power() {
        assert_eq!(parse_sensors_power(SENSORS_SAMPLE), Some(18.30));
        assert_eq!(parse_sensors_power("power1: 12 W\n"), Some(12.0));
    }

    #[test]
    fn test_parse_sensors_power_missing() {
        assert_eq!(parse_sensors_power("k10temp-pci-00c3\nTctl: +62.4°C\n"), None);
        assert_eq!(parse_sensors_power("power1:       N/A\n"), None);
    }

    #[test]
    fn test_parse_recommended_config() {
        let output = "\
[INFO] Searching for recommended configs
Found 2 recommended configs:
--------------------------------
HP OMEN Laptop 15-en0xxx
HP OMEN Laptop 15-en1xxx
";
        assert_eq!(
            parse_recommended_config(output).as_deref(),
            Some("HP OMEN Laptop 15-en0xxx")
        );
    }

    #[test]
    fn test_parse_recommended_config_none() {
        assert_eq!(parse_recommended_config("ERROR: no recommended config found\n"), None);
        assert_eq!(parse_recommended_config(""), None);
    }
}
