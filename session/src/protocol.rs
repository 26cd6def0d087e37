//! Request rendering and response parsing for the tool's interactive mode.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{FileMap, Query, SymbolInfo, ToolError};

/// `<definition> -- Defined at <file>[:<line>:<col>]` or
/// `<definition> -- Defined in ‘<module>’...`.
static INFO_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(.*?)\s+--\sDefined ((at (.+?)(:(\d+):(\d+))?)|(in ‘(.+)’.*))$")
        .expect("info boundary pattern is valid")
});

/// `<line> <col> <line> <col> "<type>"`
static TYPE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\d+\s+\d+\s+\d+\s+\d+\s+"(.*)"$"#).expect("type line pattern is valid")
});

impl Query {
    /// The request line sent to the tool. Columns are 1-based on the wire.
    pub(crate) fn command(&self) -> String {
        match self {
            Self::FindSymbol { file, symbol } => format!("info {} {symbol}", file.display()),
            Self::TypeAt { file, line, col } => {
                format!("type {} {line} {}", file.display(), col + 1)
            }
        }
    }
}

/// Start-up arguments telling the tool to read `shadow` whenever it needs
/// `original`.
pub(crate) fn map_file_args(map: &FileMap) -> Vec<OsString> {
    let mut args = Vec::with_capacity(map.len() * 2);
    for (original, shadow) in map {
        args.push(OsString::from("--map-file"));
        let mut pair = original.as_os_str().to_os_string();
        pair.push("=");
        pair.push(shadow.as_os_str());
        args.push(pair);
    }
    args
}

/// Decode a payload as UTF-8, replacing each NUL byte with `nul`.
///
/// The tool separates wrapped output with NUL bytes in some replies.
fn decode(payload: &[u8], nul: Option<u8>) -> String {
    let scrubbed: Vec<u8> = match nul {
        Some(replacement) => payload
            .iter()
            .map(|&b| if b == 0 { replacement } else { b })
            .collect(),
        None => payload.iter().copied().filter(|&b| b != 0).collect(),
    };
    String::from_utf8_lossy(&scrubbed).into_owned()
}

/// Parse the reply to an `info` request.
///
/// The first line matching [`INFO_BOUNDARY`] ends the definition; earlier
/// lines are part of the (wrapped) definition, later lines are additional
/// info.
pub(crate) fn parse_symbol_info(payload: &[u8]) -> Result<SymbolInfo, ToolError> {
    let text = decode(payload, Some(b'\n'));
    let mut info = SymbolInfo::default();
    let mut found = false;

    for line in text.lines() {
        if found {
            info.additional_info.push(line.to_string());
            continue;
        }
        let Some(caps) = INFO_BOUNDARY.captures(line) else {
            info.definition.push(line.to_string());
            continue;
        };
        found = true;
        info.definition.push(caps[1].to_string());
        if let Some(file) = caps.get(4) {
            info.file = Some(PathBuf::from(file.as_str()));
            info.line = caps.get(6).and_then(|m| m.as_str().parse().ok());
            info.col = caps.get(7).and_then(|m| m.as_str().parse().ok());
        } else if let Some(module) = caps.get(9) {
            info.module = Some(module.as_str().to_string());
        }
    }

    if found {
        Ok(info)
    } else {
        Err(ToolError::Parse(format!(
            "no definition location in info reply ({} line(s))",
            text.lines().count()
        )))
    }
}

/// Parse the reply to a `type` request: the quoted type of the first span.
pub(crate) fn parse_type_info(payload: &[u8]) -> Result<String, ToolError> {
    let text = decode(payload, None);
    TYPE_LINE
        .captures(&text)
        .map(|caps| caps[1].to_string())
        .ok_or_else(|| {
            ToolError::Parse(format!(
                "no type span in type reply ({} line(s))",
                text.lines().count()
            ))
        })
}
