use std::fmt;

use thiserror::Error;

/// Errors surfaced by the renderer core.
///
/// Resource and compile errors are local to one descriptor: the renderer logs them and
/// skips the affected objects for the frame instead of returning them from `render`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("resource error: {0}")]
    Resource(String),
    #[error("shader compile error: {0}")]
    Compile(ShaderDiagnostic),
    #[error("capability warning: {0}")]
    Capability(String),
    #[error("graphics context lost")]
    ContextLost,
    #[error("backend error: {0}")]
    Backend(String),
    #[error("settings error: {0}")]
    Settings(String),
}

impl RenderError {
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Link,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
            ShaderStage::Link => f.write_str("link"),
        }
    }
}

/// Compile or link failure for one program variant.
#[derive(Debug, Clone)]
pub struct ShaderDiagnostic {
    pub stage: ShaderStage,
    pub variant: String,
    pub log: String,
    /// Numbered source lines around the first line reported by the log.
    pub source_window: String,
}

impl ShaderDiagnostic {
    pub fn new(stage: ShaderStage, variant: &str, log: &str, source: &str) -> Self {
        Self {
            stage,
            variant: variant.to_string(),
            log: log.trim().to_string(),
            source_window: source_window(source, error_line(log)),
        }
    }
}

impl fmt::Display for ShaderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stage of '{}' failed: {}",
            self.stage, self.variant, self.log
        )?;
        if !self.source_window.is_empty() {
            write!(f, "\n{}", self.source_window)?;
        }
        Ok(())
    }
}

const SOURCE_WINDOW_RADIUS: usize = 6;

/// Extracts the 1-based line number from driver logs of the form `ERROR: 0:42: ...`
/// or `0(42) : error ...`.
fn error_line(log: &str) -> Option<usize> {
    for line in log.lines() {
        if let Some(rest) = line.trim().strip_prefix("ERROR:") {
            let mut parts = rest.trim().split(':');
            let _source = parts.next();
            if let Some(number) = parts.next().and_then(|n| n.trim().parse().ok()) {
                return Some(number);
            }
        }
        if let (Some(open), Some(close)) = (line.find('('), line.find(')')) {
            if open < close {
                if let Ok(number) = line[open + 1..close].trim().parse() {
                    return Some(number);
                }
            }
        }
    }
    None
}

fn source_window(source: &str, line: Option<usize>) -> String {
    let Some(line) = line else {
        return String::new();
    };
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let line = line.clamp(1, lines.len());
    let start = line.saturating_sub(SOURCE_WINDOW_RADIUS).max(1);
    let end = (line + SOURCE_WINDOW_RADIUS).min(lines.len());

    let mut window = String::new();
    for number in start..=end {
        let marker = if number == line { ">" } else { " " };
        window.push_str(&format!("{marker}{number:4}: {}\n", lines[number - 1]));
    }
    window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_angle_style_error_line() {
        assert_eq!(error_line("ERROR: 0:12: 'foo' : undeclared"), Some(12));
    }

    #[test]
    fn parses_nvidia_style_error_line() {
        assert_eq!(error_line("0(7) : error C1008: undefined variable"), Some(7));
    }

    #[test]
    fn window_marks_offending_line() {
        let source = (1..=20)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let diagnostic = ShaderDiagnostic::new(
            ShaderStage::Fragment,
            "basic",
            "ERROR: 0:10: syntax error",
            &source,
        );
        assert!(diagnostic.source_window.contains(">  10: line 10"));
        assert!(diagnostic.source_window.contains("   4: line 4"));
        assert!(!diagnostic.source_window.contains("line 3\n"));
        assert!(diagnostic.source_window.contains("  16: line 16"));
    }

    #[test]
    fn window_is_empty_without_line_number() {
        let diagnostic =
            ShaderDiagnostic::new(ShaderStage::Link, "basic", "link failed", "void main() {}");
        assert!(diagnostic.source_window.is_empty());
    }
}
