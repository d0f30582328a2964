use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use super::session;

const DEFAULT_SHELL_BASE: &str = "https://vitrine.example/";

const USAGE: &str = "\
usage: vitrine-shell [flags] <command>

commands:
  embed <#hash@url>              plan an embed for a pinned address
  recall <path-or-token>         look up the address stored under a scope
  manifest <#hash@url> <endpoint> fetch, rewrite, and print the app manifest
  assets <dir>                   install and activate a directory of assets
  route <path>                   ask the asset cache how it would answer a path
  rpc-demo <#hash@url>           run a scripted page session over a port pair

flags:
  --shell-base <url>    base URL of the hosting shell (default https://vitrine.example/)
  --storage-dir <dir>   profile directory (default VITRINE_STATE_DIR or ./.vitrine)
  --ephemeral           keep no durable state; manifest scopes use random segments
  --public-scope        derive shareable tokens without the install secret
  --token-chars <n>     scope token width in hex characters (8..=64)
  --assets-dir <dir>    activate this directory before routing (route only)
  --trust-os-roots      accept OS-provisioned certificate roots alongside WebPKI";

pub(crate) fn run() -> ExitCode {
    init_tracing();

    let invocation = match Invocation::from_args(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(error) => {
            eprintln!("vitrine-shell startup error: {error}");
            eprintln!();
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match session::dispatch(&invocation) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("vitrine-shell error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("VITRINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Embed { address: String },
    Recall { reference: String },
    Manifest { address: String, endpoint: String },
    Assets { dir: PathBuf },
    Route { path: String },
    RpcDemo { address: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Options {
    pub(crate) shell_base: String,
    pub(crate) storage_dir: Option<PathBuf>,
    pub(crate) ephemeral: bool,
    pub(crate) public_scope: bool,
    pub(crate) token_chars: Option<usize>,
    pub(crate) assets_dir: Option<PathBuf>,
    pub(crate) trust_os_roots: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            shell_base: DEFAULT_SHELL_BASE.to_owned(),
            storage_dir: None,
            ephemeral: false,
            public_scope: false,
            token_chars: None,
            assets_dir: None,
            trust_os_roots: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub(crate) command: Command,
    pub(crate) options: Options,
}

impl Invocation {
    fn from_args(args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut args = args;
        let mut options = Options::default();
        let mut positionals = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--shell-base" => {
                    options.shell_base = flag_value(&mut args, "--shell-base")?;
                }
                "--storage-dir" => {
                    options.storage_dir =
                        Some(PathBuf::from(flag_value(&mut args, "--storage-dir")?));
                }
                "--assets-dir" => {
                    options.assets_dir =
                        Some(PathBuf::from(flag_value(&mut args, "--assets-dir")?));
                }
                "--token-chars" => {
                    let value = flag_value(&mut args, "--token-chars")?;
                    let width = value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid token width `{value}` after --token-chars"))?;
                    options.token_chars = Some(width);
                }
                "--ephemeral" => options.ephemeral = true,
                "--public-scope" => options.public_scope = true,
                "--trust-os-roots" => options.trust_os_roots = true,
                other if other.starts_with("--") => {
                    return Err(format!("unknown flag `{other}`"));
                }
                _ => positionals.push(arg),
            }
        }

        let mut positionals = positionals.into_iter();
        let name = positionals.next().ok_or_else(|| "missing command".to_owned())?;

        let command = match name.as_str() {
            "embed" => Command::Embed {
                address: positional(&mut positionals, "embed", "<#hash@url>")?,
            },
            "recall" => Command::Recall {
                reference: positional(&mut positionals, "recall", "<path-or-token>")?,
            },
            "manifest" => Command::Manifest {
                address: positional(&mut positionals, "manifest", "<#hash@url>")?,
                endpoint: positional(&mut positionals, "manifest", "<endpoint>")?,
            },
            "assets" => Command::Assets {
                dir: PathBuf::from(positional(&mut positionals, "assets", "<dir>")?),
            },
            "route" => Command::Route {
                path: positional(&mut positionals, "route", "<path>")?,
            },
            "rpc-demo" => Command::RpcDemo {
                address: positional(&mut positionals, "rpc-demo", "<#hash@url>")?,
            },
            other => return Err(format!("unknown command `{other}`")),
        };

        if let Some(extra) = positionals.next() {
            return Err(format!("unexpected argument `{extra}`"));
        }

        Ok(Self { command, options })
    }
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next().ok_or_else(|| format!("missing value after {flag}"))
}

fn positional(
    values: &mut impl Iterator<Item = String>,
    command: &str,
    placeholder: &str,
) -> Result<String, String> {
    values
        .next()
        .ok_or_else(|| format!("`{command}` requires {placeholder}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tokens: &[&str]) -> Result<Invocation, String> {
        Invocation::from_args(tokens.iter().map(|token| (*token).to_owned()))
    }

    #[test]
    fn embed_command_takes_one_address() {
        let invocation = match parse(&["embed", "#abc@https://example.com/"]) {
            Ok(invocation) => invocation,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(
            invocation.command,
            Command::Embed {
                address: "#abc@https://example.com/".to_owned(),
            }
        );
        assert_eq!(invocation.options, Options::default());
    }

    #[test]
    fn manifest_command_takes_address_and_endpoint() {
        let invocation = match parse(&["manifest", "#abc@https://example.com/", "/manifest.json"])
        {
            Ok(invocation) => invocation,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(
            invocation.command,
            Command::Manifest {
                address: "#abc@https://example.com/".to_owned(),
                endpoint: "/manifest.json".to_owned(),
            }
        );
    }

    #[test]
    fn flags_apply_in_any_position() {
        let invocation = match parse(&[
            "--ephemeral",
            "recall",
            "--token-chars",
            "24",
            "abc123",
            "--shell-base",
            "https://host.example/",
        ]) {
            Ok(invocation) => invocation,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(
            invocation.command,
            Command::Recall {
                reference: "abc123".to_owned(),
            }
        );
        assert!(invocation.options.ephemeral);
        assert_eq!(invocation.options.token_chars, Some(24));
        assert_eq!(invocation.options.shell_base, "https://host.example/");
    }

    #[test]
    fn unknown_flags_and_commands_are_rejected() {
        assert_eq!(
            parse(&["--frobnicate", "embed", "#a@https://e.com/"]),
            Err("unknown flag `--frobnicate`".to_owned())
        );
        assert_eq!(
            parse(&["launch", "#a@https://e.com/"]),
            Err("unknown command `launch`".to_owned())
        );
    }

    #[test]
    fn missing_values_are_reported() {
        assert_eq!(parse(&["embed"]), Err("`embed` requires <#hash@url>".to_owned()));
        assert_eq!(
            parse(&["--token-chars"]),
            Err("missing value after --token-chars".to_owned())
        );
        assert_eq!(parse(&[]), Err("missing command".to_owned()));
    }

    #[test]
    fn extra_positionals_are_rejected() {
        assert_eq!(
            parse(&["recall", "abc", "def"]),
            Err("unexpected argument `def`".to_owned())
        );
    }

    #[test]
    fn token_width_must_be_numeric() {
        assert_eq!(
            parse(&["--token-chars", "wide", "embed", "#a@https://e.com/"]),
            Err("invalid token width `wide` after --token-chars".to_owned())
        );
    }
}
