//! Reader and writer for the pipeline configuration format
//!
//! The format is a small TOML-like language:
//!
//! ```text
//! # run settings
//! run_dir = "run1"
//! molecules = ["data/a.pdb", "data/b.pdb"]
//!
//! [exec]              # first step
//! command = "score $INPUT > $OUTPUT"
//!
//! [exec]              # same module again, second instance
//! [exec.weights]      # nested section of the second instance
//! vdw = 1.0
//! ```
//!
//! A section name declared more than once becomes `name.1`, `name.2`, ...
//! in declaration order. Nested sections attach to the instance that is
//! open when they are declared.

use crate::core::config::value::{ConfigTable, ConfigValue};
use crate::core::error::PipelineError;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

fn main_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[([A-Za-z0-9_]+)\]$").expect("valid regex"))
}

fn sub_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[([A-Za-z0-9_]+)((?:\.[A-Za-z0-9_]+)+)\]$").expect("valid regex")
    })
}

fn key_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_]+)\s*=\s*(.*)$").expect("valid regex"))
}

fn int_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?[0-9]+$").expect("valid regex"))
}

fn float_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:[0-9]+\.[0-9]*|\.[0-9]+|[0-9]+)(?:[eE][+-]?[0-9]+)?$")
            .expect("valid regex")
    })
}

/// Module name of a (possibly numbered or nested) section key
///
/// `get_module_name("rigid.2") == "rigid"`
pub fn get_module_name(header: &str) -> &str {
    header.split('.').next().unwrap_or(header)
}

/// Read a configuration file
pub fn load(path: impl AsRef<Path>) -> Result<ConfigTable, PipelineError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    loads(&text)
}

/// Parse configuration text into an ordered tree
pub fn loads(text: &str) -> Result<ConfigTable, PipelineError> {
    Reader::default().read(text)
}

#[derive(Default)]
struct Reader {
    root: ConfigTable,
    /// Declarations seen per top-level name
    counters: HashMap<String, usize>,
    /// Top-level names in first-seen order
    names: Vec<String>,
    /// Path of the section currently receiving keys
    current: Vec<String>,
}

impl Reader {
    fn read(mut self, text: &str) -> Result<ConfigTable, PipelineError> {
        let mut lines = text.lines().enumerate();

        while let Some((idx, raw)) = lines.next() {
            let line_no = idx + 1;
            let line = strip_comment(raw).trim().to_string();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') {
                self.open_section(&line, line_no)?;
                continue;
            }

            let caps = key_value_re().captures(&line).ok_or_else(|| {
                PipelineError::ConfigSyntax {
                    line: line_no,
                    message: format!("expected `key = value`, found `{}`", line),
                }
            })?;
            let key = caps[1].to_string();
            let mut value_text = caps[2].trim().to_string();

            // lists may continue over the following lines
            if value_text.starts_with('[') {
                while bracket_depth(&value_text) > 0 {
                    match lines.next() {
                        Some((_, next)) => {
                            value_text.push(' ');
                            value_text.push_str(strip_comment(next).trim());
                        }
                        None => {
                            return Err(PipelineError::ConfigSyntax {
                                line: line_no,
                                message: format!("unterminated list for `{}`", key),
                            })
                        }
                    }
                }
            }

            let value = parse_value(&value_text).map_err(|message| PipelineError::ConfigSyntax {
                line: line_no,
                message: format!("invalid value for `{}`: {}", key, message),
            })?;
            self.current_table().insert(key, value);
        }

        Ok(self.finish())
    }

    fn open_section(&mut self, line: &str, line_no: usize) -> Result<(), PipelineError> {
        if let Some(caps) = main_header_re().captures(line) {
            let name = caps[1].to_string();
            let count = self.declare(&name);
            let key = instance_key(&name, count);
            self.root.table_mut(&key);
            self.current = vec![key];
            return Ok(());
        }

        if let Some(caps) = sub_header_re().captures(line) {
            let name = caps[1].to_string();
            // a nested section with no parent yet opens the first instance
            let count = match self.counters.get(&name) {
                Some(n) => *n,
                None => self.declare(&name),
            };
            let mut path = vec![instance_key(&name, count)];
            path.extend(caps[2].split('.').filter(|s| !s.is_empty()).map(String::from));
            self.current = path;
            self.current_table();
            return Ok(());
        }

        Err(PipelineError::ConfigSyntax {
            line: line_no,
            message: format!("malformed section header `{}`", line),
        })
    }

    fn declare(&mut self, name: &str) -> usize {
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        if *counter == 0 {
            self.names.push(name.to_string());
        }
        *counter += 1;
        *counter
    }

    fn current_table(&mut self) -> &mut ConfigTable {
        let mut table = &mut self.root;
        for segment in &self.current {
            table = table.table_mut(segment);
        }
        table
    }

    /// Names declared exactly once lose their `.1` suffix
    fn finish(mut self) -> ConfigTable {
        for name in &self.names {
            if self.counters.get(name) == Some(&1) {
                self.root.rename(&instance_key(name, 1), name.clone());
            }
        }
        self.root
    }
}

fn instance_key(name: &str, count: usize) -> String {
    format!("{}.{}", name, count)
}

/// Drop a trailing `#` comment, ignoring `#` inside quoted strings
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Unclosed `[` count outside of strings
fn bracket_depth(text: &str) -> i64 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// Parse a complete value literal
pub fn parse_value(text: &str) -> Result<ConfigValue, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let value = parse_at(&chars, &mut pos)?;
    skip_ws(&chars, &mut pos);
    if pos != chars.len() {
        let rest: String = chars[pos..].iter().collect();
        return Err(format!("unexpected trailing input `{}`", rest));
    }
    Ok(value)
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn parse_at(chars: &[char], pos: &mut usize) -> Result<ConfigValue, String> {
    skip_ws(chars, pos);
    match chars.get(*pos) {
        None => Err("missing value".to_string()),
        Some('"') => parse_string(chars, pos).map(string_value),
        Some('[') => parse_list(chars, pos),
        Some(_) => {
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != ',' && chars[*pos] != ']' {
                *pos += 1;
            }
            let token: String = chars[start..*pos].iter().collect();
            parse_scalar(token.trim())
        }
    }
}

fn parse_string(chars: &[char], pos: &mut usize) -> Result<String, String> {
    // opening quote
    *pos += 1;
    let mut out = String::new();
    while let Some(&ch) = chars.get(*pos) {
        *pos += 1;
        match ch {
            '"' => return Ok(out),
            '\\' => {
                let escaped = chars.get(*pos).copied().ok_or("unterminated string")?;
                *pos += 1;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            other => out.push(other),
        }
    }
    Err("unterminated string".to_string())
}

fn parse_list(chars: &[char], pos: &mut usize) -> Result<ConfigValue, String> {
    // opening bracket
    *pos += 1;
    let mut items = Vec::new();
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            None => return Err("unterminated list".to_string()),
            Some(']') => {
                *pos += 1;
                return Ok(ConfigValue::List(items));
            }
            Some(_) => {
                items.push(parse_at(chars, pos)?);
                skip_ws(chars, pos);
                match chars.get(*pos) {
                    Some(',') => *pos += 1,
                    Some(']') => {}
                    Some(other) => return Err(format!("expected `,` or `]`, found `{}`", other)),
                    None => return Err("unterminated list".to_string()),
                }
            }
        }
    }
}

fn parse_scalar(token: &str) -> Result<ConfigValue, String> {
    match token {
        "true" => return Ok(ConfigValue::Bool(true)),
        "false" => return Ok(ConfigValue::Bool(false)),
        "nan" => return Ok(ConfigValue::Float(f64::NAN)),
        _ => {}
    }
    if int_re().is_match(token) {
        return token
            .parse::<i64>()
            .map(ConfigValue::Int)
            .map_err(|e| format!("`{}`: {}", token, e));
    }
    if float_re().is_match(token) {
        return token
            .parse::<f64>()
            .map(ConfigValue::Float)
            .map_err(|e| format!("`{}`: {}", token, e));
    }
    Err(format!("unrecognized literal `{}`", token))
}

fn string_value(s: String) -> ConfigValue {
    if is_path_like(&s) {
        ConfigValue::Path(normalize_path(&s))
    } else {
        ConfigValue::Str(s)
    }
}

/// Strings without whitespace that carry a path separator are paths
fn is_path_like(s: &str) -> bool {
    if s.is_empty() || s.chars().any(char::is_whitespace) || s.contains("://") {
        return false;
    }
    s.contains('/') || s.starts_with('~') || s == "." || s == ".."
}

/// Drop `.` components so `./a/b` and `a/b` compare equal
fn normalize_path(s: &str) -> PathBuf {
    let normalized: PathBuf = Path::new(s)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Render a tree back into configuration text
///
/// Numbered instances render as repeated bare headers, so the output
/// parses back into the same tree.
pub fn render(tree: &ConfigTable) -> String {
    let mut out = String::new();
    render_scalars(tree, &mut out);
    for (key, table) in tree.tables() {
        let name = get_module_name(key);
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "[{}]", name);
        render_section(name, table, &mut out);
    }
    out
}

fn render_section(header: &str, table: &ConfigTable, out: &mut String) {
    render_scalars(table, out);
    for (key, child) in table.tables() {
        let child_header = format!("{}.{}", header, key);
        let _ = writeln!(out, "[{}]", child_header);
        render_section(&child_header, child, out);
    }
}

fn render_scalars(table: &ConfigTable, out: &mut String) {
    for (key, value) in table.iter() {
        if matches!(value, ConfigValue::Table(_)) {
            continue;
        }
        let _ = writeln!(out, "{} = {}", key, render_value(value));
    }
}

fn render_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(b) => b.to_string(),
        ConfigValue::Int(i) => i.to_string(),
        ConfigValue::Float(f) if f.is_nan() => "nan".to_string(),
        ConfigValue::Float(f) => format!("{:?}", f),
        ConfigValue::Str(s) => quote(s),
        ConfigValue::Path(p) => {
            let text = p.to_string_lossy();
            if is_path_like(&text) {
                quote(&text)
            } else {
                // `foo` alone would read back as a plain string
                quote(&format!("./{}", text))
            }
        }
        ConfigValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        // tables render as sections, never inline
        ConfigValue::Table(_) => String::new(),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
