use crate::applicator::Applicator;
use crate::config::{NbfcConfigDirs, ToolsConfig};
use crate::core::{CommandResult, FanCurve, FanCurvePoint};
use crate::parse;
use crate::util::error::{NbfcError, ToolError};
use crate::util::process::{CommandRunner, elevated_copy, privileged_argv};
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::{
    cell::RefCell,
    collections::BTreeSet,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    rc::Rc,
};

pub type Result<T, E = NbfcError> = std::result::Result<T, E>;

const AUTHOR: &str = "Ryzen Master Commander";
const INVALID_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

// Temperature span used when a config only lists speed steps
const OVERRIDE_MIN_TEMP: f64 = 30.0;
const OVERRIDE_MAX_TEMP: f64 = 90.0;

/// An NBFC fan control config.
///
/// Kept as raw JSON so keys this crate does not model (registers, register
/// write configurations, ...) survive a read-modify-write cycle untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct NbfcConfig(Value);

impl NbfcConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(contents)?;
        if !value.is_object() {
            return Err(NbfcError::InvalidConfig(
                "top level is not a JSON object".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Minimal single-fan config for a new custom profile
    pub fn template(model_name: &str) -> Self {
        Self(json!({
            "NotebookModel": model_name,
            "Author": AUTHOR,
            "EcPollInterval": 5000,
            "ReadWriteWords": false,
            "CriticalTemperature": 85,
            "FanConfigurations": [{
                "ReadRegister": 122,
                "WriteRegister": 122,
                "MinSpeedValue": 0,
                "MaxSpeedValue": 255,
                "ResetRequired": true,
                "FanSpeedResetValue": 0,
                "FanDisplayName": "Fan"
            }]
        }))
    }

    pub fn notebook_model(&self) -> Option<&str> {
        self.0.get("NotebookModel").and_then(Value::as_str)
    }

    #[cfg(test)]
    fn as_json(&self) -> &Value {
        &self.0
    }

    fn first_fan(&self) -> Option<&Map<String, Value>> {
        self.0
            .get("FanConfigurations")?
            .as_array()?
            .first()?
            .as_object()
    }

    /// Curve points of the first fan as stored, rounded and sorted by
    /// temperature but not validated.
    ///
    /// Temperature thresholds are preferred. Configs that only carry speed
    /// percentage overrides are read from those instead, and bare speed
    /// steps are spread evenly over 30-90°C.
    pub fn curve_points(&self) -> Vec<FanCurvePoint> {
        let Some(fan) = self.first_fan() else {
            return Vec::new();
        };

        let pairs: Vec<(f64, f64)> = match fan.get("TemperatureThresholds").and_then(Value::as_array) {
            Some(thresholds) if !thresholds.is_empty() => thresholds
                .iter()
                .filter_map(|t| Some((number(t, "UpThreshold")?, number(t, "FanSpeed")?)))
                .collect(),
            _ => fan
                .get("FanSpeedPercentageOverrides")
                .and_then(Value::as_array)
                .map(|overrides| override_pairs(overrides))
                .unwrap_or_default(),
        };

        let mut points: Vec<FanCurvePoint> = pairs
            .into_iter()
            .map(|(t, s)| FanCurvePoint {
                temperature_celsius: t.round(),
                fan_speed_percent: s.round(),
            })
            .collect();
        points.sort_by(|a, b| a.temperature_celsius.total_cmp(&b.temperature_celsius));
        points
    }

    /// The first fan's curve, if it is one this crate can edit and write back.
    ///
    /// Returns `None` when there is no curve, and logs the rule that failed
    /// when the stored points do not form a valid curve (a single
    /// threshold, two thresholds rounding to the same degree, ...).
    pub fn fan_curve(&self) -> Option<FanCurve> {
        let points = self.curve_points();
        if points.is_empty() {
            return None;
        }

        match FanCurve::new(points) {
            Ok(curve) => Some(curve),
            Err(e) => {
                warn!(
                    "Fan curve of '{}' cannot be edited: {e}",
                    self.notebook_model().unwrap_or("unnamed config")
                );
                None
            }
        }
    }

    /// Rename the config
    #[must_use]
    pub fn with_notebook_model(mut self, model_name: &str) -> Self {
        if let Some(root) = self.0.as_object_mut() {
            root.insert("NotebookModel".to_string(), json!(model_name));
        }
        self
    }

    /// Replace the first fan's curve with temperature thresholds.
    ///
    /// Each threshold's down value sits one degree above the previous
    /// point (clamped to its own up value); the first one sits 5°C below.
    /// Percentage overrides are dropped since NBFC would prefer them.
    #[must_use]
    pub fn with_fan_curve(mut self, curve: &FanCurve) -> Self {
        let Some(root) = self.0.as_object_mut() else {
            return self;
        };

        let fans = root
            .entry("FanConfigurations")
            .or_insert_with(|| json!([]));
        if fans.is_object() {
            let single = fans.take();
            *fans = Value::Array(vec![single]);
        } else if !fans.is_array() {
            *fans = json!([]);
        }

        let Some(fans) = fans.as_array_mut() else {
            return self;
        };
        if fans.is_empty() {
            fans.push(json!({ "ReadRegister": 122, "WriteRegister": 122 }));
        }
        if !fans[0].is_object() {
            fans[0] = json!({});
        }

        if let Some(fan) = fans[0].as_object_mut() {
            fan.insert(
                "TemperatureThresholds".to_string(),
                Value::Array(thresholds(curve.points())),
            );
            fan.remove("FanSpeedPercentageOverrides");
        }

        self
    }

    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

fn number(value: &Value, key: &str) -> Option<f64> {
    value.get(key)?.as_f64()
}

fn override_pairs(overrides: &[Value]) -> Vec<(f64, f64)> {
    let Some(first) = overrides.first() else {
        return Vec::new();
    };

    if first.get("Temperature").is_some() && first.get("FanSpeed").is_some() {
        return overrides
            .iter()
            .filter_map(|o| Some((number(o, "Temperature")?, number(o, "FanSpeed")?)))
            .collect();
    }

    if first.get("FanSpeedPercentage").is_some() && first.get("FanSpeedValue").is_some() {
        let step = if overrides.len() > 1 {
            (OVERRIDE_MAX_TEMP - OVERRIDE_MIN_TEMP) / (overrides.len() - 1) as f64
        } else {
            10.0
        };
        return overrides
            .iter()
            .enumerate()
            .filter_map(|(i, o)| {
                Some((
                    (i as f64).mul_add(step, OVERRIDE_MIN_TEMP),
                    number(o, "FanSpeedPercentage")?,
                ))
            })
            .collect();
    }

    Vec::new()
}

#[allow(clippy::cast_possible_truncation)]
fn thresholds(points: &[FanCurvePoint]) -> Vec<Value> {
    let mut previous: Option<i64> = None;
    points
        .iter()
        .map(|point| {
            let up = point.temperature_celsius.trunc() as i64;
            let down = previous.map_or(up - 5, |prev| (prev + 1).min(up)).max(0);
            previous = Some(up);
            json!({
                "UpThreshold": up,
                "DownThreshold": down,
                "FanSpeed": point.fan_speed_percent
            })
        })
        .collect()
}

/// Base config for a new fan profile: a copy of `base` if given, the
/// template otherwise, renamed to `name` and carrying `curve`.
pub fn build_fan_profile(base: Option<&NbfcConfig>, name: &str, curve: &FanCurve) -> NbfcConfig {
    base.cloned()
        .unwrap_or_else(|| NbfcConfig::template(name))
        .with_notebook_model(name)
        .with_fan_curve(curve)
}

pub fn validate_fan_profile_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(INVALID_NAME_CHARS) || name == "." || name == ".." {
        return Err(NbfcError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Names (file stems) of every config in `dirs`, sorted and de-duplicated.
/// Missing or unreadable directories are skipped.
pub fn available_configs(dirs: &[PathBuf]) -> Vec<String> {
    let mut names = BTreeSet::new();

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            debug!("NBFC config directory not readable: {}", dir.display());
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem() {
                    names.insert(stem.to_string_lossy().into_owned());
                }
            }
        }
    }

    names.into_iter().collect()
}

/// Path of the config called `name`, searching `dirs` in order
pub fn find_config(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(format!("{name}.json")))
        .find(|path| path.is_file())
}

pub fn load_named_config(dirs: &[PathBuf], name: &str) -> Result<NbfcConfig> {
    let path = find_config(dirs, name).ok_or_else(|| NbfcError::NotFound(name.to_string()))?;
    NbfcConfig::load(&path)
}

/// Write `<name>.json` into the primary NBFC config directory.
///
/// System config directories are normally root-owned; on permission
/// errors the file is staged in a temporary file and copied in with
/// elevated rights.
pub fn save_fan_profile(
    dirs: &NbfcConfigDirs,
    tools: &ToolsConfig,
    name: &str,
    config: &NbfcConfig,
) -> Result<PathBuf> {
    validate_fan_profile_name(name)?;

    let dir = dirs.primary_dir();
    let path = dir.join(format!("{name}.json"));
    let contents = config.to_pretty_json()?;

    let direct = fs::create_dir_all(&dir).and_then(|()| fs::write(&path, &contents));
    match direct {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied && tools.use_escalation => {
            debug!("{} not writable, staging fan profile", dir.display());
            let mut staged = tempfile::Builder::new()
                .prefix("rmc-fan-profile-")
                .suffix(".json")
                .tempfile()?;
            staged.write_all(contents.as_bytes())?;
            staged.flush()?;
            elevated_copy(tools, staged.path(), &path)?;
        }
        Err(e) => return Err(e.into()),
    }

    info!("Saved fan profile to {}", path.display());
    Ok(path)
}

/// Whether the `nbfc` client can be found
pub fn is_installed(tools: &ToolsConfig) -> bool {
    which::which(&tools.nbfc).is_ok()
}

/// Whether the NBFC service answers `nbfc status`.
///
/// The client exits with `ERROR: connect()` on stderr when the service
/// socket is missing; any other failure still means the service is up.
pub fn is_running<R: CommandRunner>(runner: &R, tools: &ToolsConfig) -> bool {
    match runner.run(&tools.nbfc, &["status"]) {
        Ok(_) => true,
        Err(ToolError::Failed { stderr, .. }) => !stderr.contains("ERROR: connect()"),
        Err(e) => {
            debug!("NBFC status probe failed: {e}");
            false
        }
    }
}

/// Ask NBFC (with elevated rights) for the config matching this machine
pub fn recommended_config<R: CommandRunner>(runner: &R, tools: &ToolsConfig) -> Option<String> {
    let argv = privileged_argv(tools, &tools.nbfc, &["config".to_string(), "-r".to_string()]);
    let (program, args) = argv.split_first()?;
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match runner.run(program, &args) {
        Ok(output) => parse::parse_recommended_config(&output),
        Err(e) => {
            warn!("Error getting recommended config: {e}");
            None
        }
    }
}

/// How [`setup`] got the service running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupOutcome {
    AlreadyRunning,
    Started,
    /// The service only started after selecting this recommended config
    Configured(String),
}

/// Bring the NBFC service up with as little input as possible.
///
/// Starts the service if it is down. If that fails the model configs are
/// updated, the recommended config for this machine is selected and the
/// service is started again. Every privileged step goes through
/// `applicator` and waits for the previous one to finish.
pub fn setup<R: CommandRunner>(
    runner: &R,
    applicator: &mut Applicator,
    tools: &ToolsConfig,
) -> Result<SetupOutcome> {
    if !is_installed(tools) {
        return Err(NbfcError::NotInstalled(tools.nbfc.clone()));
    }

    if is_running(runner, tools) {
        info!("NBFC service is already running");
        return Ok(SetupOutcome::AlreadyRunning);
    }

    info!("NBFC is not running, attempting to start it...");
    let started = run_step(applicator, |app, done| {
        app.start_service(done);
    });
    if started.succeeded {
        return Ok(SetupOutcome::Started);
    }

    info!("NBFC service failed to start, selecting a config...");
    let updated = run_step(applicator, |app, done| {
        app.update_configs(done);
    });
    if !updated.succeeded {
        // Configs that are already installed may still include this model
        warn!("Continuing without updated configs: {}", updated.message);
    }

    let recommended = recommended_config(runner, tools).ok_or_else(|| {
        NbfcError::Setup(
            "no recommended config for this machine, pick one with `fan configs` and `fan select`"
                .to_string(),
        )
    })?;

    let selected = run_step(applicator, |app, done| {
        app.select_config(&recommended, done);
    });
    if !selected.succeeded {
        return Err(NbfcError::Setup(selected.message));
    }
    info!("Applied recommended config: {recommended}");

    let restarted = run_step(applicator, |app, done| {
        app.start_service(done);
    });
    if !restarted.succeeded {
        return Err(NbfcError::Setup(restarted.message));
    }

    Ok(SetupOutcome::Configured(recommended))
}

/// Launch one operation and block until its handler has run
fn run_step<F>(applicator: &mut Applicator, launch: F) -> CommandResult
where
    F: FnOnce(&mut Applicator, Box<dyn FnOnce(CommandResult)>),
{
    let slot: Rc<RefCell<Option<CommandResult>>> = Rc::default();
    let sink = Rc::clone(&slot);
    launch(
        applicator,
        Box::new(move |result: CommandResult| *sink.borrow_mut() = Some(result)),
    );
    applicator.wait_all();

    let result = slot.borrow_mut().take();
    result.unwrap_or_else(|| CommandResult::failure("Operation finished without a result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedRunner {
        result: RefCell<Option<std::result::Result<String, ToolError>>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn new(result: std::result::Result<String, ToolError>) -> Self {
            Self {
                result: RefCell::new(Some(result)),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::result::Result<String, ToolError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(ToString::to_string));
            self.calls.borrow_mut().push(call);
            self.result
                .borrow_mut()
                .take()
                .unwrap_or_else(|| Err(ToolError::NotInstalled(program.to_string())))
        }
    }

    fn failed(stderr: &str) -> ToolError {
        ToolError::Failed {
            tool: "nbfc".to_string(),
            code: Some(1),
            stderr: stderr.to_string(),
        }
    }

    /// Answers `nbfc status` and `nbfc config -r`, appending the nbfc
    /// arguments of every call to the same log the fake tool writes.
    struct ServiceRunner {
        nbfc: String,
        log: PathBuf,
        running: bool,
        recommended: Option<&'static str>,
    }

    impl CommandRunner for ServiceRunner {
        fn run(&self, program: &str, args: &[&str]) -> std::result::Result<String, ToolError> {
            let words: Vec<&str> = std::iter::once(program)
                .chain(args.iter().copied())
                .skip_while(|word| *word != self.nbfc)
                .skip(1)
                .collect();
            let mut log = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log)
                .unwrap();
            writeln!(log, "{}", words.join(" ")).unwrap();

            match words.as_slice() {
                ["status"] if self.running => Ok("Read-only : false\n".to_string()),
                ["status"] => Err(failed("ERROR: connect(): No such file or directory")),
                ["config", "-r"] => match self.recommended {
                    Some(name) => Ok(format!("Found 1 recommended config:\n{name}\n")),
                    None => Ok("No recommended configs found\n".to_string()),
                },
                _ => Err(failed("unexpected call")),
            }
        }
    }

    // `start` fails until a config has been selected, like a fresh install
    const SERVICE_SCRIPT: &str = r#"here="$(dirname "$0")"
echo "$@" >> "$here/args.log"
if [ "$1" = start ] && [ ! -f "$here/selected" ]; then
    echo 'ERROR: /etc/nbfc/nbfc.json: No such file or directory' >&2
    exit 1
fi
if [ "$1" = config ] && [ "$2" = -s ]; then
    touch "$here/selected"
fi
"#;

    fn service_fixture(
        dir: &Path,
        running: bool,
        recommended: Option<&'static str>,
    ) -> (ToolsConfig, ServiceRunner) {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("nbfc");
        fs::write(&script, SERVICE_SCRIPT).unwrap();
        // only needs to look installed; it is always run through `sh`
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let tools = ToolsConfig {
            use_escalation: true,
            escalation: "sh".to_string(),
            nbfc: script.display().to_string(),
            ..ToolsConfig::default()
        };
        let runner = ServiceRunner {
            nbfc: tools.nbfc.clone(),
            log: dir.join("args.log"),
            running,
            recommended,
        };
        (tools, runner)
    }

    fn logged_calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("args.log"))
            .unwrap_or_default()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    fn pairs(curve: &FanCurve) -> Vec<(f64, f64)> {
        curve
            .points()
            .iter()
            .map(|p| (p.temperature_celsius, p.fan_speed_percent))
            .collect()
    }

    #[test]
    fn test_fan_curve_from_thresholds() {
        let config = NbfcConfig::from_json(
            r#"{"NotebookModel": "Test", "FanConfigurations": [{
                "TemperatureThresholds": [
                    {"UpThreshold": 60, "DownThreshold": 48, "FanSpeed": 50.4},
                    {"UpThreshold": 0, "DownThreshold": 0, "FanSpeed": 0.0},
                    {"UpThreshold": 80, "DownThreshold": 61, "FanSpeed": 100.0}
                ]}]}"#,
        )
        .unwrap();

        let curve = config.fan_curve().unwrap();
        assert_eq!(pairs(&curve), vec![(0.0, 0.0), (60.0, 50.0), (80.0, 100.0)]);
    }

    #[test]
    fn test_fan_curve_from_temperature_overrides() {
        let config = NbfcConfig::from_json(
            r#"{"FanConfigurations": [{"FanSpeedPercentageOverrides": [
                {"Temperature": 40, "FanSpeed": 20},
                {"Temperature": 70, "FanSpeed": 80}
            ]}]}"#,
        )
        .unwrap();

        assert_eq!(
            pairs(&config.fan_curve().unwrap()),
            vec![(40.0, 20.0), (70.0, 80.0)]
        );
    }

    #[test]
    fn test_fan_curve_from_speed_steps() {
        let config = NbfcConfig::from_json(
            r#"{"FanConfigurations": [{"FanSpeedPercentageOverrides": [
                {"FanSpeedPercentage": 0, "FanSpeedValue": 0},
                {"FanSpeedPercentage": 50, "FanSpeedValue": 128},
                {"FanSpeedPercentage": 100, "FanSpeedValue": 255}
            ]}]}"#,
        )
        .unwrap();

        assert_eq!(
            pairs(&config.fan_curve().unwrap()),
            vec![(30.0, 0.0), (60.0, 50.0), (90.0, 100.0)]
        );
    }

    #[test]
    fn test_single_threshold_is_shown_but_not_editable() {
        let config = NbfcConfig::from_json(
            r#"{"NotebookModel": "One Step", "FanConfigurations": [{
                "TemperatureThresholds": [
                    {"UpThreshold": 60, "DownThreshold": 50, "FanSpeed": 100.0}
                ]}]}"#,
        )
        .unwrap();

        assert_eq!(
            config.curve_points(),
            vec![FanCurvePoint {
                temperature_celsius: 60.0,
                fan_speed_percent: 100.0
            }]
        );
        assert_eq!(config.fan_curve(), None);
    }

    #[test]
    fn test_thresholds_rounding_together_are_kept_for_display() {
        let config = NbfcConfig::from_json(
            r#"{"FanConfigurations": [{"TemperatureThresholds": [
                {"UpThreshold": 60.4, "DownThreshold": 55, "FanSpeed": 40.0},
                {"UpThreshold": 59.6, "DownThreshold": 50, "FanSpeed": 30.0},
                {"UpThreshold": 75, "DownThreshold": 61, "FanSpeed": 90.0}
            ]}]}"#,
        )
        .unwrap();

        let temps: Vec<f64> = config
            .curve_points()
            .iter()
            .map(|p| p.temperature_celsius)
            .collect();
        assert_eq!(temps, vec![60.0, 60.0, 75.0]);
        assert_eq!(config.fan_curve(), None);
    }

    #[test]
    fn test_missing_curve() {
        let config = NbfcConfig::from_json(r#"{"NotebookModel": "Bare"}"#).unwrap();
        assert!(config.curve_points().is_empty());
        assert_eq!(config.fan_curve(), None);
    }

    #[test]
    fn test_non_object_config_rejected() {
        assert!(matches!(
            NbfcConfig::from_json("[1, 2, 3]"),
            Err(NbfcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_with_fan_curve_writes_thresholds() {
        let curve = FanCurve::from_pairs(&[(3.0, 0.0), (40.0, 30.0), (41.0, 60.0), (80.0, 100.0)])
            .unwrap();
        let config = NbfcConfig::template("Custom").with_fan_curve(&curve);

        let thresholds = &config.as_json()["FanConfigurations"][0]["TemperatureThresholds"];
        let downs: Vec<i64> = thresholds
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["DownThreshold"].as_i64().unwrap())
            .collect();
        assert_eq!(downs, vec![0, 4, 41, 42]);
        assert_eq!(thresholds[1]["UpThreshold"], 40);
        assert_eq!(thresholds[1]["FanSpeed"], 30.0);

        assert_eq!(config.fan_curve(), Some(curve));
    }

    #[test]
    fn test_with_fan_curve_preserves_other_keys() {
        let base = NbfcConfig::from_json(
            r#"{"NotebookModel": "HP OMEN", "LegacyTemperatureThresholdsBehaviour": true,
                "RegisterWriteConfigurations": [{"Register": 147, "Value": 20}],
                "FanConfigurations": [
                    {"ReadRegister": 17, "FanSpeedPercentageOverrides": [
                        {"FanSpeedPercentage": 0, "FanSpeedValue": 0}]},
                    {"ReadRegister": 18}
                ]}"#,
        )
        .unwrap();

        let saved = build_fan_profile(Some(&base), "My Curve", &FanCurve::default());
        let json = saved.as_json();

        assert_eq!(saved.notebook_model(), Some("My Curve"));
        assert_eq!(json["LegacyTemperatureThresholdsBehaviour"], true);
        assert_eq!(json["RegisterWriteConfigurations"][0]["Register"], 147);
        assert_eq!(json["FanConfigurations"][0]["ReadRegister"], 17);
        assert_eq!(json["FanConfigurations"][1]["ReadRegister"], 18);
        assert!(json["FanConfigurations"][0].get("FanSpeedPercentageOverrides").is_none());
        assert_eq!(saved.fan_curve(), Some(FanCurve::default()));
    }

    #[test]
    fn test_template_profile() {
        let config = build_fan_profile(None, "Silent", &FanCurve::default());
        let json = config.as_json();
        assert_eq!(json["Author"], AUTHOR);
        assert_eq!(json["CriticalTemperature"], 85);
        assert_eq!(json["FanConfigurations"][0]["MaxSpeedValue"], 255);
        assert_eq!(config.fan_curve(), Some(FanCurve::default()));
    }

    #[test]
    fn test_available_configs_merges_directories() {
        let root = tempfile::tempdir().unwrap();
        let shared = root.path().join("share");
        let etc = root.path().join("etc");
        fs::create_dir_all(&shared).unwrap();
        fs::create_dir_all(&etc).unwrap();
        fs::write(shared.join("Zephyrus G14.json"), "{}").unwrap();
        fs::write(shared.join("Acer Nitro.json"), "{}").unwrap();
        fs::write(shared.join("README.md"), "").unwrap();
        fs::write(etc.join("Acer Nitro.json"), "{}").unwrap();

        let dirs = vec![shared.clone(), etc, root.path().join("missing")];
        assert_eq!(available_configs(&dirs), vec!["Acer Nitro", "Zephyrus G14"]);
        assert_eq!(
            find_config(&dirs, "Acer Nitro"),
            Some(shared.join("Acer Nitro.json"))
        );
        assert!(matches!(
            load_named_config(&dirs, "Nope"),
            Err(NbfcError::NotFound(_))
        ));
    }

    #[test]
    fn test_save_fan_profile_writes_primary_dir() {
        let root = tempfile::tempdir().unwrap();
        let dirs = NbfcConfigDirs {
            config_dirs: vec![root.path().join("configs"), root.path().join("other")],
        };
        let config = build_fan_profile(None, "Quiet Fans", &FanCurve::default());

        let path = save_fan_profile(&dirs, &ToolsConfig::default(), "Quiet Fans", &config).unwrap();
        assert_eq!(path, root.path().join("configs/Quiet Fans.json"));
        assert_eq!(NbfcConfig::load(&path).unwrap(), config);
        assert_eq!(available_configs(&dirs.config_dirs), vec!["Quiet Fans"]);
    }

    #[test]
    fn test_save_fan_profile_rejects_bad_name() {
        let root = tempfile::tempdir().unwrap();
        let dirs = NbfcConfigDirs {
            config_dirs: vec![root.path().to_path_buf()],
        };
        let config = NbfcConfig::template("x");
        assert!(matches!(
            save_fan_profile(&dirs, &ToolsConfig::default(), "a/b", &config),
            Err(NbfcError::InvalidName(_))
        ));
    }

    #[test]
    fn test_is_running() {
        let tools = ToolsConfig::default();
        assert!(is_running(&ScriptedRunner::new(Ok("Read-only : false".into())), &tools));
        assert!(!is_running(
            &ScriptedRunner::new(Err(failed("ERROR: connect(): No such file or directory"))),
            &tools
        ));
        assert!(is_running(&ScriptedRunner::new(Err(failed("ERROR: timeout"))), &tools));
        assert!(!is_running(
            &ScriptedRunner::new(Err(ToolError::NotInstalled("nbfc".into()))),
            &tools
        ));
    }

    #[test]
    fn test_recommended_config_runs_elevated() {
        let runner = ScriptedRunner::new(Ok("Found 1 recommended config:\nHP Envy x360\n".into()));
        let tools = ToolsConfig::default();

        assert_eq!(
            recommended_config(&runner, &tools).as_deref(),
            Some("HP Envy x360")
        );
        assert_eq!(
            runner.calls.borrow()[0],
            vec!["pkexec", "nbfc", "config", "-r"]
        );
    }

    #[test]
    fn test_recommended_config_failure() {
        let runner = ScriptedRunner::new(Err(failed("Request dismissed")));
        assert_eq!(recommended_config(&runner, &ToolsConfig::default()), None);
    }

    #[test]
    fn test_setup_selects_recommended_config_when_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, runner) = service_fixture(dir.path(), false, Some("HP Envy x360"));
        let mut applicator = Applicator::new(tools.clone());

        let outcome = setup(&runner, &mut applicator, &tools).unwrap();

        assert_eq!(outcome, SetupOutcome::Configured("HP Envy x360".to_string()));
        assert_eq!(
            logged_calls(dir.path()),
            vec![
                "status",
                "start",
                "update",
                "config -r",
                "config -s HP Envy x360",
                "start"
            ]
        );
        assert_eq!(applicator.pending_count(), 0);
    }

    #[test]
    fn test_setup_stops_when_service_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, runner) = service_fixture(dir.path(), true, Some("HP Envy x360"));
        let mut applicator = Applicator::new(tools.clone());

        assert_eq!(
            setup(&runner, &mut applicator, &tools).unwrap(),
            SetupOutcome::AlreadyRunning
        );
        assert_eq!(logged_calls(dir.path()), vec!["status"]);
    }

    #[test]
    fn test_setup_starts_configured_service() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, runner) = service_fixture(dir.path(), false, None);
        fs::write(dir.path().join("selected"), "").unwrap();
        let mut applicator = Applicator::new(tools.clone());

        assert_eq!(
            setup(&runner, &mut applicator, &tools).unwrap(),
            SetupOutcome::Started
        );
        assert_eq!(logged_calls(dir.path()), vec!["status", "start"]);
    }

    #[test]
    fn test_setup_without_recommendation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (tools, runner) = service_fixture(dir.path(), false, None);
        let mut applicator = Applicator::new(tools.clone());

        let err = setup(&runner, &mut applicator, &tools).unwrap_err();

        assert!(matches!(err, NbfcError::Setup(_)), "{err}");
        assert_eq!(
            logged_calls(dir.path()),
            vec!["status", "start", "update", "config -r"]
        );
        assert!(!dir.path().join("selected").exists());
    }

    #[test]
    fn test_setup_requires_nbfc() {
        let tools = ToolsConfig {
            nbfc: "/nonexistent/rmc-nbfc".to_string(),
            ..ToolsConfig::default()
        };
        let runner = ScriptedRunner::new(Ok(String::new()));
        let mut applicator = Applicator::new(tools.clone());

        assert!(matches!(
            setup(&runner, &mut applicator, &tools),
            Err(NbfcError::NotInstalled(_))
        ));
        assert!(runner.calls.borrow().is_empty());
    }
}
