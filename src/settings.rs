//! Command-line settings
//!
//! `raw_ntfs_copy <command> <source> [target] [flags]`

use thiserror::Error;

use crate::extract::{AttributeSelector, Target};
use crate::listing::DetailLevel;
use crate::ntfs::{NtfsOptions, DEFAULT_MAX_LINK_DEPTH};
use crate::reference::MftReference;
use crate::volume::get_volume_path;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ArgsError {
    #[error("missing command")]
    MissingCommand,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("missing {0}")]
    MissingArgument(&'static str),

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option {option} needs a value")]
    MissingValue { option: String },

    #[error("invalid value '{value}' for {option}")]
    InvalidValue { option: String, value: String },

    #[error("unexpected argument '{0}'")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Image file or device path.
    pub path: String,
    /// Byte offset of the volume inside the source.
    pub offset: u64,
    /// Plain reads instead of a memory map.
    pub raw: bool,
    pub options: NtfsOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Folder(String),
    Tcp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info {
        source: SourceSettings,
    },
    Extract {
        source: SourceSettings,
        target: Target,
        selector: AttributeSelector,
        output: Output,
        output_name: Option<String>,
    },
    List {
        source: SourceSettings,
        path: String,
        detail: DetailLevel,
    },
}

/// Parse the arguments after the program name.
pub fn parse_args(args: &[String]) -> Result<Command, ArgsError> {
    let command = args.first().ok_or(ArgsError::MissingCommand)?;
    let mut positional = Vec::new();
    let mut offset = 0u64;
    let mut raw = false;
    let mut options = NtfsOptions::default();
    let mut output_folder = None;
    let mut tcp = None;
    let mut output_name = None;
    let mut all_attributes = false;
    let mut full = false;

    let mut rest = args[1..].iter();
    while let Some(arg) = rest.next() {
        let mut value = |option: &str| {
            rest.next().cloned().ok_or_else(|| ArgsError::MissingValue {
                option: option.to_string(),
            })
        };
        match arg.as_str() {
            "--offset" => offset = parse_number(arg, &value(arg)?)?,
            "--raw" => raw = true,
            "--drive" => {
                let letter = value(arg)?;
                let mut chars = letter.trim_end_matches(':').chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => {
                        options.drive_letter = Some(c.to_ascii_uppercase())
                    }
                    _ => {
                        return Err(ArgsError::InvalidValue {
                            option: arg.clone(),
                            value: letter,
                        })
                    }
                }
            }
            "--max-link-depth" => {
                options.max_link_depth = parse_number(arg, &value(arg)?)? as usize
            }
            "--output" => output_folder = Some(value(arg)?),
            "--tcp" => tcp = Some(value(arg)?),
            "--name" => output_name = Some(value(arg)?),
            "--all-attributes" => all_attributes = true,
            "--full" => full = true,
            other if other.starts_with("--") => {
                return Err(ArgsError::UnknownOption(other.to_string()))
            }
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    let mut path = positional.next().ok_or(ArgsError::MissingArgument("source"))?;
    if let Some(letter) = drive_letter_of(&path) {
        // A bare drive letter names the mounted volume itself
        path = get_volume_path(&path);
        raw = true;
        options.drive_letter.get_or_insert(letter);
    }
    let source = SourceSettings {
        path,
        offset,
        raw,
        options,
    };

    let parsed = match command.as_str() {
        "info" => Command::Info { source },
        "extract" => {
            let target = positional.next().ok_or(ArgsError::MissingArgument("file path or MFT number"))?;
            let output = match (tcp, output_folder) {
                (Some(address), _) => Output::Tcp(address),
                (None, Some(folder)) => Output::Folder(folder),
                (None, None) => Output::Folder(".".to_string()),
            };
            Command::Extract {
                source,
                target: parse_target(&target),
                selector: if all_attributes {
                    AttributeSelector::All
                } else {
                    AttributeSelector::DataOnly
                },
                output,
                output_name,
            }
        }
        "list" => Command::List {
            source,
            path: positional.next().unwrap_or_else(|| "\\".to_string()),
            detail: if full { DetailLevel::Full } else { DetailLevel::Brief },
        },
        other => return Err(ArgsError::UnknownCommand(other.to_string())),
    };

    if let Some(extra) = positional.next() {
        return Err(ArgsError::Unexpected(extra));
    }
    Ok(parsed)
}

fn drive_letter_of(source: &str) -> Option<char> {
    let mut chars = source.trim_end_matches('\\').chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(c), Some(':'), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

/// A bare number selects an MFT record, anything else is a path.
fn parse_target(value: &str) -> Target {
    match value.parse::<u64>() {
        Ok(record) => Target::Reference(MftReference::new(record, 0)),
        Err(_) => Target::Path(value.to_string()),
    }
}

fn parse_number(option: &str, value: &str) -> Result<u64, ArgsError> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| ArgsError::InvalidValue {
        option: option.to_string(),
        value: value.to_string(),
    })
}

pub fn usage() -> String {
    format!(
        "Usage:\n  \
         raw_ntfs_copy info <source> [--offset N] [--raw]\n  \
         raw_ntfs_copy extract <source> <path|mft-number> [--output DIR | --tcp HOST:PORT] [--name NAME] [--all-attributes]\n  \
         raw_ntfs_copy list <source> [path] [--full]\n\
         Common options: --offset N (volume start in bytes), --raw (no memory map), --drive X, --max-link-depth N (default {})",
        DEFAULT_MAX_LINK_DEPTH
    )
}
