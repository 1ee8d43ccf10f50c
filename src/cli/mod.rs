use crate::domain::SortMode;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CliInvocation {
    PrintHelp,
    PrintVersion,
    Tui(TuiOptions),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TuiOptions {
    pub root: Option<PathBuf>,
    pub sort: Option<SortMode>,
    pub no_follow: bool,
}

#[derive(Debug, Error)]
pub enum CliParseError {
    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    #[error("missing value for flag: {0}")]
    MissingFlagValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlagValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),
}

/// Parses `args` including the program name at index 0.
pub fn parse_invocation(args: &[String]) -> Result<CliInvocation, CliParseError> {
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        return Ok(CliInvocation::PrintHelp);
    }
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        return Ok(CliInvocation::PrintVersion);
    }

    let mut options = TuiOptions::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--root" | "-r" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--root".to_string()))?;
                options.root = Some(PathBuf::from(value));
            }
            "--sort" | "-s" => {
                let value = iter
                    .next()
                    .ok_or_else(|| CliParseError::MissingFlagValue("--sort".to_string()))?;
                options.sort = Some(parse_sort_flag("--sort", value)?);
            }
            "--no-follow" => options.no_follow = true,
            _ => {
                if let Some(value) = arg.strip_prefix("--root=") {
                    options.root = Some(PathBuf::from(value));
                } else if let Some(value) = arg.strip_prefix("--sort=") {
                    options.sort = Some(parse_sort_flag("--sort", value)?);
                } else if arg.starts_with('-') {
                    return Err(CliParseError::UnknownFlag(arg.to_string()));
                } else {
                    return Err(CliParseError::UnexpectedArgument(arg.to_string()));
                }
            }
        }
    }

    Ok(CliInvocation::Tui(options))
}

fn parse_sort_flag(flag: &str, value: &str) -> Result<SortMode, CliParseError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "name" | "alpha" | "a-z" => Ok(SortMode::Alphabetical),
        "recent" | "time" => Ok(SortMode::Recent),
        _ => Err(CliParseError::InvalidFlagValue {
            flag: flag.to_string(),
            value: value.to_string(),
        }),
    }
}
