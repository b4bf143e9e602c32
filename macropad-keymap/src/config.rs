//! Loaders for the configuration documents.
//!
//! A configuration directory holds:
//!
//! ```text
//! components.json      physical inputs and their matrix cells
//! actions.json         the `default` layer plus named layers
//! macros/index.json    list of macro ids (optional)
//! macros/<id>.json     one document per macro
//! ```
//!
//! The documents use string-typed tags and hex strings; everything is
//! lowered once into [`Binding`], [`MacroCommand`] and [`Component`] here so
//! the firmware never sees the string forms. Problems that only affect one
//! entry are recorded in [`Warnings`] and the entry is dropped or turned
//! into [`Binding::None`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::binding::{Binding, ComponentBinding, LayerBindings, DEFAULT_LAYER};
use crate::component::{
    Component, ComponentKind, ComponentSet, Direction, EncoderConfig, EncoderHardware,
    MatrixPosition,
};
use crate::error::ConfigError;
use crate::macros::{
    Macro, MacroCommand, MacroLibrary, MouseButton, DEFAULT_MOUSE_SPEED, MAX_CLICKS,
    MAX_MOUSE_SPEED, MIN_MOUSE_SPEED, MIN_REPEAT,
};
use crate::report::{KeyboardReport, KEYBOARD_REPORT_LEN};

pub const COMPONENTS_FILE: &str = "components.json";
pub const ACTIONS_FILE: &str = "actions.json";
pub const MACROS_DIR: &str = "macros";
pub const MACRO_INDEX_FILE: &str = "index.json";

/// Non-fatal problems found while loading, in document order.
#[derive(Clone, Debug, Default)]
pub struct Warnings {
    messages: Vec<String>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and log a warning.
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.messages.push(message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ============================================================================
// Hex values
// ============================================================================

/// A byte or usage written either as a JSON number or as a string
/// (`"0x1D"` or `"29"`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum HexValue {
    Number(u64),
    Text(String),
}

impl HexValue {
    fn byte(b: u8) -> Self {
        HexValue::Text(format!("0x{:02X}", b))
    }

    fn value(&self) -> Result<u64, ConfigError> {
        match self {
            HexValue::Number(n) => Ok(*n),
            HexValue::Text(s) => parse_hex(s),
        }
    }
}

/// Parse `0x`-prefixed hex or bare decimal.
pub fn parse_hex(text: &str) -> Result<u64, ConfigError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => trimmed.parse::<u64>(),
    };
    parsed.map_err(|_| ConfigError::InvalidHex(text.to_string()))
}

fn byte_at(values: &[HexValue], idx: usize) -> Result<u8, ConfigError> {
    match values.get(idx) {
        None => Ok(0),
        Some(v) => {
            let n = v.value()?;
            u8::try_from(n).map_err(|_| {
                ConfigError::InvalidReport(format!("byte {} out of range: {}", idx, n))
            })
        }
    }
}

fn keyboard_report(values: &[HexValue]) -> Result<KeyboardReport, ConfigError> {
    if values.len() > KEYBOARD_REPORT_LEN {
        return Err(ConfigError::InvalidReport(format!(
            "keyboard report has {} bytes, expected at most {}",
            values.len(),
            KEYBOARD_REPORT_LEN
        )));
    }
    let mut bytes = [0u8; KEYBOARD_REPORT_LEN];
    for (idx, slot) in bytes.iter_mut().enumerate() {
        *slot = byte_at(values, idx)?;
    }
    Ok(KeyboardReport::from_bytes(bytes))
}

/// Decode a consumer usage from its document form.
///
/// One element is the usage itself, two are `[lo, hi]`, three or four
/// follow the 4-byte report layout with the usage in bytes 2..3.
fn consumer_usage(values: &[HexValue]) -> Result<u16, ConfigError> {
    let usage = match values.len() {
        1 => {
            let n = values[0].value()?;
            u16::try_from(n)
                .map_err(|_| ConfigError::InvalidReport(format!("usage out of range: {}", n)))?
        }
        2 => u16::from_le_bytes([byte_at(values, 0)?, byte_at(values, 1)?]),
        3 | 4 => u16::from_le_bytes([byte_at(values, 2)?, byte_at(values, 3)?]),
        n => {
            return Err(ConfigError::InvalidReport(format!(
                "consumer report has {} bytes, expected 1 to 4",
                n
            )))
        }
    };
    Ok(usage)
}

fn consumer_values(usage: u16) -> Vec<HexValue> {
    let [lo, hi] = usage.to_le_bytes();
    vec![HexValue::byte(lo), HexValue::byte(hi)]
}

fn keyboard_values(report: &KeyboardReport) -> Vec<HexValue> {
    report.to_bytes().iter().map(|&b| HexValue::byte(b)).collect()
}

/// `buttonPress` arrays come flat or wrapped in an outer array.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum ReportValue {
    Nested(Vec<Vec<HexValue>>),
    Flat(Vec<HexValue>),
}

impl ReportValue {
    fn first(&self) -> &[HexValue] {
        match self {
            ReportValue::Nested(reports) => reports.first().map(Vec::as_slice).unwrap_or(&[]),
            ReportValue::Flat(values) => values,
        }
    }
}

// ============================================================================
// Components document
// ============================================================================

#[derive(Debug, Deserialize)]
struct ComponentsFile {
    #[serde(default)]
    components: Vec<RawComponent>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<RawSize>,
    #[serde(default)]
    start_location: Option<RawLocation>,
    #[serde(default)]
    with_button: bool,
    #[serde(default)]
    encoder: Option<RawEncoder>,
}

#[derive(Debug, Deserialize)]
struct RawSize {
    rows: usize,
    columns: usize,
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    row: usize,
    column: usize,
}

#[derive(Debug, Deserialize)]
struct RawEncoder {
    #[serde(default = "default_encoder_kind", alias = "type")]
    kind: String,
    #[serde(default = "default_direction")]
    direction: i64,
    #[serde(default, alias = "zeroPosition")]
    zero_position: u16,
}

fn default_encoder_kind() -> String {
    "quadrature".to_string()
}

fn default_direction() -> i64 {
    1
}

fn lower_encoder(id: &str, raw: Option<RawEncoder>) -> Result<EncoderConfig, ConfigError> {
    let Some(raw) = raw else {
        return Ok(EncoderConfig {
            hardware: EncoderHardware::Quadrature,
            direction: Direction::Forward,
            zero_position: 0,
        });
    };
    let invalid = |reason: String| ConfigError::InvalidComponent {
        id: id.to_string(),
        reason,
    };
    let hardware = match raw.kind.to_ascii_lowercase().as_str() {
        "quadrature" | "mechanical" => EncoderHardware::Quadrature,
        "magnetic" | "as5600" => EncoderHardware::Magnetic,
        other => return Err(invalid(format!("unknown encoder kind {:?}", other))),
    };
    let direction = Direction::from_sign(raw.direction)
        .ok_or_else(|| invalid(format!("direction must be 1 or -1, got {}", raw.direction)))?;
    if raw.zero_position > 4095 {
        return Err(invalid(format!("zero_position {} exceeds 4095", raw.zero_position)));
    }
    Ok(EncoderConfig {
        hardware,
        direction,
        zero_position: raw.zero_position,
    })
}

/// Parse a components document.
pub fn parse_components(json: &str, warnings: &mut Warnings) -> Result<ComponentSet, ConfigError> {
    let file: ComponentsFile = serde_json::from_str(json)?;
    let mut set = ComponentSet::new();

    for raw in file.components {
        let position = raw.start_location.as_ref().map(|l| MatrixPosition {
            row: l.row,
            col: l.column,
        });
        let size = raw.size.as_ref().map(|s| (s.rows, s.columns)).unwrap_or((1, 1));

        let component = match raw.kind.as_str() {
            "button" => {
                let Some(position) = position else {
                    return Err(ConfigError::InvalidComponent {
                        id: raw.id,
                        reason: "button without start_location".to_string(),
                    });
                };
                Component {
                    id: raw.id,
                    kind: ComponentKind::Button,
                    position: Some(position),
                    size,
                    encoder: None,
                }
            }
            "encoder" => {
                let encoder = lower_encoder(&raw.id, raw.encoder)?;
                if raw.with_button && position.is_none() {
                    return Err(ConfigError::InvalidComponent {
                        id: raw.id,
                        reason: "encoder button without start_location".to_string(),
                    });
                }
                Component {
                    position: if raw.with_button { position } else { None },
                    id: raw.id,
                    kind: ComponentKind::Encoder,
                    size,
                    encoder: Some(encoder),
                }
            }
            other => {
                warnings.push(format!(
                    "component {}: type {:?} is not an input, ignored",
                    raw.id, other
                ));
                continue;
            }
        };

        set.insert(component)
            .map_err(|c| ConfigError::DuplicateComponent(c.id))?;
    }

    let cells = set.matrix_cells();
    let claimed: usize = set.iter().filter(|c| c.position.is_some()).count();
    if cells.len() < claimed {
        warnings.push(format!(
            "{} component(s) share a matrix cell with another component and will never fire",
            claimed - cells.len()
        ));
    }

    Ok(set)
}

// ============================================================================
// Actions document
// ============================================================================

#[derive(Debug, Deserialize)]
struct ActionsFile {
    actions: RawActions,
}

#[derive(Debug, Deserialize)]
struct RawActions {
    #[serde(rename = "layer-config", alias = "default", default)]
    default: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    layers: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "buttonPress", alias = "consumerReport", default)]
    button_press: Option<ReportValue>,
    #[serde(rename = "macroId", alias = "macro_id", default)]
    macro_id: Option<String>,
    #[serde(rename = "targetLayer", alias = "layerId", default)]
    target_layer: Option<String>,
    #[serde(default)]
    clockwise: Option<ReportValue>,
    #[serde(default)]
    counterclockwise: Option<ReportValue>,
}

/// Every layer described by an actions document, `default` included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionsConfig {
    pub layers: BTreeMap<String, LayerBindings>,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(DEFAULT_LAYER.to_string(), LayerBindings::new());
        Self { layers }
    }
}

impl ActionsConfig {
    pub fn parse(json: &str, warnings: &mut Warnings) -> Result<Self, ConfigError> {
        let file: ActionsFile = serde_json::from_str(json)?;
        let mut config = ActionsConfig::default();

        let default = lower_layer(DEFAULT_LAYER, file.actions.default, warnings);
        config.layers.insert(DEFAULT_LAYER.to_string(), default);

        for (name, entries) in file.actions.layers {
            if name == DEFAULT_LAYER {
                warnings.push("layers.default duplicates the layer-config block, ignored");
                continue;
            }
            let layer = lower_layer(&name, entries, warnings);
            config.layers.insert(name, layer);
        }

        Ok(config)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerBindings> {
        self.layers.get(name)
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }
}

fn lower_layer(
    layer: &str,
    entries: BTreeMap<String, serde_json::Value>,
    warnings: &mut Warnings,
) -> LayerBindings {
    let mut bindings = LayerBindings::new();
    for (component, value) in entries {
        let binding = match serde_json::from_value::<RawAction>(value) {
            Ok(raw) => lower_action(layer, &component, raw, warnings),
            Err(e) => {
                warnings.push(format!("layer {} component {}: {}", layer, component, e));
                ComponentBinding::default()
            }
        };
        bindings.insert(component, binding);
    }
    bindings
}

#[derive(Clone, Copy)]
enum ReportKind {
    Keyboard,
    Consumer,
}

fn lower_report(kind: ReportKind, value: Option<&ReportValue>) -> Result<Binding, ConfigError> {
    let Some(value) = value else {
        return Ok(Binding::None);
    };
    let values = value.first();
    if values.is_empty() {
        return Ok(Binding::None);
    }
    Ok(match kind {
        ReportKind::Keyboard => Binding::Hid {
            report: keyboard_report(values)?,
        },
        ReportKind::Consumer => Binding::Consumer {
            usage: consumer_usage(values)?,
        },
    })
}

fn lower_action(
    layer: &str,
    component: &str,
    raw: RawAction,
    warnings: &mut Warnings,
) -> ComponentBinding {
    let mut out = ComponentBinding::default();
    let context = format!("layer {} component {}", layer, component);

    let report_kind = match raw.kind.as_str() {
        "hid" => Some(ReportKind::Keyboard),
        "multimedia" | "consumer" => Some(ReportKind::Consumer),
        _ => None,
    };

    if let Some(kind) = report_kind {
        let slots = [
            ("buttonPress", raw.button_press.as_ref(), &mut out.press),
            ("clockwise", raw.clockwise.as_ref(), &mut out.clockwise),
            ("counterclockwise", raw.counterclockwise.as_ref(), &mut out.counterclockwise),
        ];
        for (name, value, slot) in slots {
            match lower_report(kind, value) {
                Ok(binding) => *slot = binding,
                Err(e) => warnings.push(format!("{} {}: {}", context, name, e)),
            }
        }
        return out;
    }

    match raw.kind.as_str() {
        "macro" => match raw.macro_id {
            Some(id) if !id.is_empty() => out.press = Binding::Macro { id },
            _ => warnings.push(format!("{}: macro binding without macroId", context)),
        },
        "layer" => match raw.target_layer {
            Some(target) if !target.is_empty() => out.press = Binding::Layer { target },
            _ => warnings.push(format!("{}: layer binding without targetLayer", context)),
        },
        "none" | "" => {}
        other => warnings.push(format!("{}: unknown action type {:?}", context, other)),
    }

    out
}

// ============================================================================
// Macro documents
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
struct RawMacro {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    commands: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct MacroIndex {
    #[serde(default)]
    macros: Vec<IndexEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum IndexEntry {
    Id(String),
    Entry { id: String },
}

impl IndexEntry {
    fn id(&self) -> &str {
        match self {
            IndexEntry::Id(id) | IndexEntry::Entry { id } => id,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum ButtonValue {
    Code(u64),
    Name(String),
}

fn default_speed() -> i64 {
    DEFAULT_MOUSE_SPEED as i64
}

fn default_button() -> ButtonValue {
    ButtonValue::Name(MouseButton::Left.name().to_string())
}

fn default_clicks() -> i64 {
    1
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawCommand {
    KeyPress {
        report: Vec<HexValue>,
    },
    KeyDown {
        report: Vec<HexValue>,
    },
    KeyUp,
    ConsumerPress {
        report: Vec<HexValue>,
    },
    TypeText {
        text: String,
    },
    Delay {
        #[serde(alias = "ms")]
        milliseconds: u32,
    },
    RandomDelay {
        min_time: u32,
        max_time: u32,
    },
    ExecuteMacro {
        #[serde(alias = "macroId")]
        macro_id: String,
    },
    MouseMove {
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default = "default_speed")]
        speed: i64,
    },
    MouseClick {
        #[serde(default = "default_button")]
        button: ButtonValue,
        #[serde(default = "default_clicks")]
        clicks: i64,
    },
    MouseScroll {
        amount: i64,
    },
    RepeatStart {
        count: i64,
    },
    RepeatEnd,
    #[serde(other)]
    Unknown,
}

fn lower_command(raw: RawCommand) -> Result<MacroCommand, String> {
    Ok(match raw {
        RawCommand::KeyPress { report } => MacroCommand::KeyPress {
            report: keyboard_report(&report).map_err(|e| e.to_string())?,
        },
        RawCommand::KeyDown { report } => MacroCommand::KeyDown {
            report: keyboard_report(&report).map_err(|e| e.to_string())?,
        },
        RawCommand::KeyUp => MacroCommand::KeyUp,
        RawCommand::ConsumerPress { report } => MacroCommand::ConsumerPress {
            usage: consumer_usage(&report).map_err(|e| e.to_string())?,
        },
        RawCommand::TypeText { text } => MacroCommand::TypeText { text },
        RawCommand::Delay { milliseconds } => MacroCommand::Delay { ms: milliseconds },
        RawCommand::RandomDelay { min_time, max_time } => MacroCommand::RandomDelay {
            min_ms: min_time.min(max_time),
            max_ms: min_time.max(max_time),
        },
        RawCommand::ExecuteMacro { macro_id } => MacroCommand::ExecuteMacro { id: macro_id },
        RawCommand::MouseMove { x, y, speed } => MacroCommand::MouseMove {
            dx: x,
            dy: y,
            speed: speed.clamp(MIN_MOUSE_SPEED as i64, MAX_MOUSE_SPEED as i64) as u8,
        },
        RawCommand::MouseClick { button, clicks } => {
            let buttons = match button {
                ButtonValue::Name(name) => MouseButton::from_name(&name)
                    .map(MouseButton::bits)
                    .ok_or_else(|| format!("unknown mouse button {:?}", name))?,
                ButtonValue::Code(code) => {
                    u8::try_from(code).map_err(|_| format!("mouse button {} out of range", code))?
                }
            };
            MacroCommand::MouseClick {
                buttons,
                clicks: clicks.clamp(1, MAX_CLICKS as i64) as u8,
            }
        }
        RawCommand::MouseScroll { amount } => MacroCommand::MouseScroll {
            amount: amount.clamp(i8::MIN as i64, i8::MAX as i64) as i8,
        },
        RawCommand::RepeatStart { count } => MacroCommand::RepeatStart {
            count: count.clamp(MIN_REPEAT as i64, u16::MAX as i64) as u16,
        },
        RawCommand::RepeatEnd => MacroCommand::RepeatEnd,
        RawCommand::Unknown => return Err("unknown command type".to_string()),
    })
}

fn raise_command(command: &MacroCommand) -> RawCommand {
    match command {
        MacroCommand::KeyPress { report } => RawCommand::KeyPress {
            report: keyboard_values(report),
        },
        MacroCommand::KeyDown { report } => RawCommand::KeyDown {
            report: keyboard_values(report),
        },
        MacroCommand::KeyUp => RawCommand::KeyUp,
        MacroCommand::ConsumerPress { usage } => RawCommand::ConsumerPress {
            report: consumer_values(*usage),
        },
        MacroCommand::TypeText { text } => RawCommand::TypeText { text: text.clone() },
        MacroCommand::Delay { ms } => RawCommand::Delay { milliseconds: *ms },
        MacroCommand::RandomDelay { min_ms, max_ms } => RawCommand::RandomDelay {
            min_time: *min_ms,
            max_time: *max_ms,
        },
        MacroCommand::ExecuteMacro { id } => RawCommand::ExecuteMacro {
            macro_id: id.clone(),
        },
        MacroCommand::MouseMove { dx, dy, speed } => RawCommand::MouseMove {
            x: *dx,
            y: *dy,
            speed: *speed as i64,
        },
        MacroCommand::MouseClick { buttons, clicks } => RawCommand::MouseClick {
            button: match MouseButton::from_bits(*buttons) {
                Some(b) => ButtonValue::Name(b.name().to_string()),
                None => ButtonValue::Code(*buttons as u64),
            },
            clicks: *clicks as i64,
        },
        MacroCommand::MouseScroll { amount } => RawCommand::MouseScroll {
            amount: *amount as i64,
        },
        MacroCommand::RepeatStart { count } => RawCommand::RepeatStart {
            count: *count as i64,
        },
        MacroCommand::RepeatEnd => RawCommand::RepeatEnd,
    }
}

/// Parse one macro document. Commands that fail to decode are dropped
/// with a warning; the macro itself still loads.
pub fn parse_macro(json: &str, warnings: &mut Warnings) -> Result<Macro, ConfigError> {
    let raw: RawMacro = serde_json::from_str(json)?;
    let mut commands = Vec::with_capacity(raw.commands.len());

    for (idx, value) in raw.commands.into_iter().enumerate() {
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("<missing>")
            .to_string();
        let lowered = serde_json::from_value::<RawCommand>(value)
            .map_err(|e| e.to_string())
            .and_then(lower_command);
        match lowered {
            Ok(command) => commands.push(command),
            Err(reason) => warnings.push(format!(
                "macro {} command {} ({}): {}, dropped",
                raw.id, idx, tag, reason
            )),
        }
    }

    let mut mac = Macro {
        name: if raw.name.is_empty() {
            raw.id.clone()
        } else {
            raw.name
        },
        id: raw.id,
        description: raw.description,
        commands,
    };
    let dropped = mac.normalize();
    if dropped > 0 {
        warnings.push(format!(
            "macro {}: {} unbalanced repeat marker(s) dropped",
            mac.id, dropped
        ));
    }
    Ok(mac)
}

/// Serialize a macro in the document format `parse_macro` reads.
pub fn macro_to_json(mac: &Macro) -> Result<String, ConfigError> {
    let commands = mac
        .commands
        .iter()
        .map(|c| serde_json::to_value(raise_command(c)))
        .collect::<Result<Vec<_>, _>>()?;
    let raw = RawMacro {
        id: mac.id.clone(),
        name: mac.name.clone(),
        description: mac.description.clone(),
        commands,
    };
    Ok(serde_json::to_string_pretty(&raw)?)
}

fn check_macro_id(id: &str) -> Result<(), ConfigError> {
    let bad = id.is_empty()
        || id == MACRO_INDEX_FILE.trim_end_matches(".json")
        || id.contains(['/', '\\'])
        || id.starts_with('.');
    if bad {
        return Err(ConfigError::InvalidMacroId(id.to_string()));
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))
}

impl MacroLibrary {
    /// Load every macro in `dir`. Uses `index.json` when present, else every
    /// `*.json` file in the directory. A missing directory is an empty library.
    pub fn load_dir(dir: &Path, warnings: &mut Warnings) -> Result<Self, ConfigError> {
        let mut library = MacroLibrary::new();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "no macro directory");
            return Ok(library);
        }

        let index_path = dir.join(MACRO_INDEX_FILE);
        let ids: Vec<String> = if index_path.is_file() {
            let index: MacroIndex = serde_json::from_str(&read_file(&index_path)?)
                .map_err(|e| ConfigError::from(e).at(&index_path))?;
            index.macros.iter().map(|e| e.id().to_string()).collect()
        } else {
            let mut ids = Vec::new();
            let entries = fs::read_dir(dir).map_err(|e| ConfigError::io(dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| ConfigError::io(dir, e))?.path();
                let is_json = path.extension().is_some_and(|ext| ext == "json");
                if !is_json || path.file_name().is_some_and(|n| n == MACRO_INDEX_FILE) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
            ids.sort();
            ids
        };

        for id in ids {
            if check_macro_id(&id).is_err() {
                warnings.push(format!("macro index names invalid id {:?}, skipped", id));
                continue;
            }
            let path = dir.join(format!("{}.json", id));
            if !path.is_file() {
                warnings.push(format!(
                    "macro {} listed in index but {} is missing",
                    id,
                    path.display()
                ));
                continue;
            }
            let mac = parse_macro(&read_file(&path)?, warnings).map_err(|e| e.at(&path))?;
            if mac.id != id {
                warnings.push(format!(
                    "macro file {} declares id {:?}, using {:?}",
                    path.display(),
                    mac.id,
                    id
                ));
            }
            library.insert(Macro { id, ..mac });
        }

        Ok(library)
    }

    /// Write one macro to `dir/<id>.json` and refresh the index.
    pub fn save(&self, dir: &Path, id: &str) -> Result<(), ConfigError> {
        check_macro_id(id)?;
        let mac = self
            .get(id)
            .ok_or_else(|| ConfigError::MacroNotFound(id.to_string()))?;
        fs::create_dir_all(dir).map_err(|e| ConfigError::io(dir, e))?;
        let path = dir.join(format!("{}.json", id));
        fs::write(&path, macro_to_json(mac)?).map_err(|e| ConfigError::io(&path, e))?;
        self.write_index(dir)
    }

    /// Remove a macro from the library and from `dir`.
    pub fn delete(&mut self, dir: &Path, id: &str) -> Result<Macro, ConfigError> {
        check_macro_id(id)?;
        let mac = self
            .remove(id)
            .ok_or_else(|| ConfigError::MacroNotFound(id.to_string()))?;
        let path = dir.join(format!("{}.json", id));
        if path.exists() {
            fs::remove_file(&path).map_err(|e| ConfigError::io(&path, e))?;
        }
        self.write_index(dir)?;
        Ok(mac)
    }

    fn write_index(&self, dir: &Path) -> Result<(), ConfigError> {
        let index = MacroIndex {
            macros: self.ids().map(|id| IndexEntry::Id(id.to_string())).collect(),
        };
        let path = dir.join(MACRO_INDEX_FILE);
        let json = serde_json::to_string_pretty(&index)?;
        fs::write(&path, json).map_err(|e| ConfigError::io(&path, e))
    }
}

// ============================================================================
// Configuration directory
// ============================================================================

/// Everything loaded from one configuration directory.
#[derive(Debug)]
pub struct Configuration {
    pub components: ComponentSet,
    pub actions: ActionsConfig,
    pub macros: MacroLibrary,
    pub warnings: Warnings,
}

impl Configuration {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut warnings = Warnings::new();

        let components_path = dir.join(COMPONENTS_FILE);
        let components = parse_components(&read_file(&components_path)?, &mut warnings)
            .map_err(|e| e.at(&components_path))?;

        let actions_path = dir.join(ACTIONS_FILE);
        let actions = if actions_path.is_file() {
            ActionsConfig::parse(&read_file(&actions_path)?, &mut warnings)
                .map_err(|e| e.at(&actions_path))?
        } else {
            warnings.push(format!("{} missing, every component is unbound", ACTIONS_FILE));
            ActionsConfig::default()
        };

        let macros = MacroLibrary::load_dir(&dir.join(MACROS_DIR), &mut warnings)?;

        for (layer, bindings) in &actions.layers {
            for id in bindings.keys() {
                if !components.contains(id) {
                    warnings.push(format!("layer {} binds unknown component {}", layer, id));
                }
            }
        }

        Ok(Self {
            components,
            actions,
            macros,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hid(bytes: [u8; 8]) -> Binding {
        Binding::Hid {
            report: KeyboardReport::from_bytes(bytes),
        }
    }

    // --- Hex parsing ---

    #[test]
    fn hex_and_decimal_values() {
        assert_eq!(parse_hex("0x1D").unwrap(), 0x1D);
        assert_eq!(parse_hex("0XE9").unwrap(), 0xE9);
        assert_eq!(parse_hex("29").unwrap(), 29);
        assert!(matches!(parse_hex("zz"), Err(ConfigError::InvalidHex(_))));
    }

    #[test]
    fn consumer_usage_forms() {
        let two = vec![HexValue::Text("0xE9".into()), HexValue::Text("0x00".into())];
        assert_eq!(consumer_usage(&two).unwrap(), 0x00E9);

        let four: Vec<HexValue> = ["0x00", "0x00", "0xE9", "0x00"]
            .iter()
            .map(|s| HexValue::Text(s.to_string()))
            .collect();
        assert_eq!(consumer_usage(&four).unwrap(), 0x00E9);

        assert_eq!(consumer_usage(&[HexValue::Number(0x223)]).unwrap(), 0x0223);
        assert!(consumer_usage(&[]).is_err());
    }

    // --- Components ---

    #[test]
    fn components_document() {
        let json = r#"{"components": [
            {"id": "button-1", "type": "button", "size": {"rows": 1, "columns": 1},
             "start_location": {"row": 0, "column": 0}},
            {"id": "encoder-1", "type": "encoder", "start_location": {"row": 0, "column": 1},
             "with_button": true,
             "encoder": {"type": "as5600", "direction": -1, "zero_position": 100}},
            {"id": "encoder-2", "type": "encoder", "start_location": {"row": 0, "column": 2}},
            {"id": "display-1", "type": "display"}
        ]}"#;
        let mut warnings = Warnings::new();
        let set = parse_components(json, &mut warnings).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(warnings.len(), 1);
        let enc = set.get("encoder-1").unwrap();
        assert!(enc.has_button());
        let cfg = enc.encoder.unwrap();
        assert_eq!(cfg.hardware, EncoderHardware::Magnetic);
        assert_eq!(cfg.direction, Direction::Reverse);
        assert_eq!(cfg.zero_position, 100);

        let plain = set.get("encoder-2").unwrap();
        assert!(!plain.has_button());
        assert_eq!(plain.encoder.unwrap().hardware, EncoderHardware::Quadrature);
        assert_eq!(set.matrix_cells().len(), 2);
    }

    #[test]
    fn components_reject_duplicates_and_bad_direction() {
        let dup = r#"{"components": [
            {"id": "b", "type": "button", "start_location": {"row": 0, "column": 0}},
            {"id": "b", "type": "button", "start_location": {"row": 0, "column": 1}}
        ]}"#;
        assert!(matches!(
            parse_components(dup, &mut Warnings::new()),
            Err(ConfigError::DuplicateComponent(id)) if id == "b"
        ));

        let bad = r#"{"components": [
            {"id": "e", "type": "encoder", "encoder": {"kind": "magnetic", "direction": 2}}
        ]}"#;
        assert!(matches!(
            parse_components(bad, &mut Warnings::new()),
            Err(ConfigError::InvalidComponent { .. })
        ));
    }

    // --- Actions ---

    #[test]
    fn actions_document() {
        let json = r#"{"actions": {
            "layer-config": {
                "button-1": {"type": "hid",
                    "buttonPress": ["0x00","0x00","0x04","0x00","0x00","0x00","0x00","0x00"]},
                "button-2": {"type": "layer", "targetLayer": "edit"},
                "button-3": {"type": "macro", "macroId": "hi3"},
                "encoder-1": {"type": "multimedia", "buttonPress": [["0x00","0x00","0xE2","0x00"]],
                              "clockwise": ["0xE9","0x00"], "counterclockwise": ["0xEA","0x00"]}
            },
            "layers": {
                "edit": {
                    "button-2": {"type": "hid", "buttonPress": [["0x00","0x00","0x1D"]]},
                    "button-3": {"type": "multimedia",
                        "consumerReport": ["0x00","0x00","0xCD","0x00"]}
                }
            }
        }}"#;
        let mut warnings = Warnings::new();
        let actions = ActionsConfig::parse(json, &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(actions.layer_names().collect::<Vec<_>>(), vec!["default", "edit"]);

        let default = actions.layer("default").unwrap();
        assert_eq!(default["button-1"].press, hid([0, 0, 0x04, 0, 0, 0, 0, 0]));
        assert_eq!(default["button-2"].press, Binding::Layer { target: "edit".into() });
        assert_eq!(default["button-3"].press, Binding::Macro { id: "hi3".into() });
        assert_eq!(default["encoder-1"].press, Binding::Consumer { usage: 0xE2 });
        assert_eq!(default["encoder-1"].clockwise, Binding::Consumer { usage: 0xE9 });
        assert_eq!(default["encoder-1"].counterclockwise, Binding::Consumer { usage: 0xEA });

        let edit = actions.layer("edit").unwrap();
        assert_eq!(edit["button-2"].press, hid([0, 0, 0x1D, 0, 0, 0, 0, 0]));
        assert_eq!(edit["button-3"].press, Binding::Consumer { usage: 0xCD });
    }

    #[test]
    fn malformed_actions_become_none() {
        let json = r#"{"actions": {"default": {
            "button-1": {"type": "teleport"},
            "button-2": {"type": "hid",
                "buttonPress": ["0x00","0x00","0x04","0x00","0x00","0x00","0x00","0x00","0x00"]},
            "button-3": {"type": "hid", "buttonPress": ["0x00","0x00","nope"]},
            "button-4": {"buttonPress": []}
        }}}"#;
        let mut warnings = Warnings::new();
        let actions = ActionsConfig::parse(json, &mut warnings).unwrap();
        let default = actions.layer(DEFAULT_LAYER).unwrap();

        assert_eq!(default.len(), 4);
        assert!(default.values().all(ComponentBinding::is_empty));
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn missing_default_block_still_yields_default_layer() {
        let actions =
            ActionsConfig::parse(r#"{"actions": {"layers": {"x": {}}}}"#, &mut Warnings::new())
                .unwrap();
        assert!(actions.layer(DEFAULT_LAYER).is_some());
        assert!(actions.layer("x").is_some());
    }

    // --- Macros ---

    #[test]
    fn macro_document_with_every_command() {
        let json = r#"{"id": "all", "name": "Everything", "description": "demo", "commands": [
            {"type": "key_press",
             "report": ["0x02","0x00","0x0B","0x00","0x00","0x00","0x00","0x00"]},
            {"type": "key_down", "report": ["0x00","0x00","0x04"]},
            {"type": "key_up"},
            {"type": "consumer_press", "report": ["0x00","0x00","0xE9","0x00"]},
            {"type": "type_text", "text": "Hi 5"},
            {"type": "delay", "milliseconds": 100},
            {"type": "random_delay", "min_time": 400, "max_time": 200},
            {"type": "execute_macro", "macro_id": "other"},
            {"type": "mouse_move", "x": 10, "y": -4, "speed": 42},
            {"type": "mouse_click", "button": "right", "clicks": 7},
            {"type": "mouse_scroll", "amount": -300},
            {"type": "repeat_start", "count": 1},
            {"type": "repeat_end"}
        ]}"#;
        let mut warnings = Warnings::new();
        let mac = parse_macro(json, &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(mac.name, "Everything");
        assert_eq!(mac.description.as_deref(), Some("demo"));
        assert_eq!(mac.commands.len(), 13);
        assert_eq!(mac.commands[3], MacroCommand::ConsumerPress { usage: 0xE9 });
        assert_eq!(mac.commands[6], MacroCommand::RandomDelay { min_ms: 200, max_ms: 400 });
        assert_eq!(mac.commands[8], MacroCommand::MouseMove { dx: 10, dy: -4, speed: 10 });
        assert_eq!(mac.commands[9], MacroCommand::MouseClick { buttons: 0x02, clicks: 3 });
        assert_eq!(mac.commands[10], MacroCommand::MouseScroll { amount: -128 });
        assert_eq!(mac.commands[11], MacroCommand::RepeatStart { count: 2 });
    }

    #[test]
    fn unknown_commands_are_dropped_with_warning() {
        let json = r#"{"id": "m", "commands": [
            {"type": "launch_rocket", "target": "moon"},
            {"type": "delay", "ms": 5},
            {"type": "mouse_click", "button": "pinky"},
            {"type": "key_press"}
        ]}"#;
        let mut warnings = Warnings::new();
        let mac = parse_macro(json, &mut warnings).unwrap();
        assert_eq!(mac.name, "m");
        assert_eq!(mac.commands, vec![MacroCommand::Delay { ms: 5 }]);
        assert_eq!(warnings.len(), 3);
    }

    #[test]
    fn saved_macro_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = MacroLibrary::new();
        let mut mac = Macro::new(
            "hi3",
            vec![
                MacroCommand::RepeatStart { count: 3 },
                MacroCommand::KeyPress {
                    report: KeyboardReport::from_bytes([0, 0, 0x0B, 0, 0, 0, 0, 0]),
                },
                MacroCommand::Delay { ms: 100 },
                MacroCommand::RepeatEnd,
                MacroCommand::MouseClick { buttons: 0x03, clicks: 2 },
            ],
        );
        mac.description = Some("three h".into());
        lib.insert(mac.clone());
        lib.save(dir.path(), "hi3").unwrap();

        let mut warnings = Warnings::new();
        let loaded = MacroLibrary::load_dir(dir.path(), &mut warnings).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(loaded.get("hi3"), Some(&mac));

        lib.delete(dir.path(), "hi3").unwrap();
        assert!(!dir.path().join("hi3.json").exists());
        let reloaded = MacroLibrary::load_dir(dir.path(), &mut Warnings::new()).unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn directory_scan_without_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), r#"{"id": "b", "commands": []}"#).unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id": "wrong", "commands": []}"#).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut warnings = Warnings::new();
        let lib = MacroLibrary::load_dir(dir.path(), &mut warnings).unwrap();
        assert_eq!(lib.ids().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn invalid_macro_ids_are_refused() {
        let lib = MacroLibrary::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            lib.save(dir.path(), "../escape"),
            Err(ConfigError::InvalidMacroId(_))
        ));
        assert!(matches!(
            lib.save(dir.path(), "missing"),
            Err(ConfigError::MacroNotFound(_))
        ));
    }

    // --- Directory ---

    #[test]
    fn configuration_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(COMPONENTS_FILE),
            r#"{"components": [
                {"id": "button-1", "type": "button", "start_location": {"row": 0, "column": 0}}
            ]}"#,
        )
        .unwrap();
        fs::write(
            dir.path().join(ACTIONS_FILE),
            r#"{"actions": {"layer-config": {"button-9": {"type": "macro", "macroId": "x"}}}}"#,
        )
        .unwrap();

        let config = Configuration::load(dir.path()).unwrap();
        assert_eq!(config.components.len(), 1);
        assert!(config.macros.is_empty());
        assert_eq!(config.warnings.len(), 1);
        assert!(config.warnings.iter().next().unwrap().contains("button-9"));
    }

    #[test]
    fn missing_components_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Configuration::load(dir.path()),
            Err(ConfigError::Io { .. })
        ));
    }
}
