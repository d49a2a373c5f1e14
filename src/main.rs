//! Purpose: `wa-inspect` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs the inspector server or a one-off decode.
//! Invariants: `decode` exits 0 for undecodable payloads; failure is reported as data.
//! Invariants: Argument payloads are decoded verbatim; stdin loses only its trailing newline.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod serve;

use wa_inspect::api::{
    DEFAULT_MAX_INFLATED_BYTES, Error, ErrorKind, Inspector, TRACKING_ENDPOINT, to_exit_code,
};

fn main() {
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<(), Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    std::process::exit(2);
                }
                return Ok(());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `wa-inspect --help` for usage."));
            }
        },
    };

    match cli.command {
        Command::Serve(args) => run_serve(args),
        Command::Decode {
            payload,
            formatted,
            max_inflated_bytes,
        } => run_decode(payload, formatted, max_inflated_bytes),
    }
}

#[derive(Parser)]
#[command(
    name = "wa-inspect",
    version,
    about = "Intercept and decode LinkedIn Website Actions payloads",
    long_about = None,
    after_help = r#"EXAMPLES
  $ wa-inspect serve                       # inspector API on 127.0.0.1:9780
  $ wa-inspect decode H4sIAAAAAAACA6tWSlSyMqwFAK+sG1YHAAAA
  $ pbpaste | wa-inspect decode --formatted"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run the inspector server that intercepts page fetches")]
    Serve(ServeArgs),
    #[command(
        about = "Decode one payload (base64 → gzip → JSON)",
        long_about = r#"Decode one payload (base64 → gzip → JSON) and print the stored entry.

Undecodable payloads still produce an entry whose raw value carries `error` and `rawData`."#
    )]
    Decode {
        #[arg(help = "Payload text; omit or use '-' to read stdin")]
        payload: Option<String>,
        #[arg(long, help = "Print only the formatted text shown by the inspector")]
        formatted: bool,
        #[arg(long, default_value_t = DEFAULT_MAX_INFLATED_BYTES, value_parser = clap::value_parser!(u64).range(1..), help = "Largest inflated payload accepted before it is stored as an inflate failure")]
        max_inflated_bytes: u64,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:9780", help = "Address to bind")]
    bind: SocketAddr,
    #[arg(long, help = "Allow binding a non-loopback address")]
    allow_non_loopback: bool,
    #[arg(long, default_value = TRACKING_ENDPOINT, help = "URL prefix whose request bodies are decoded")]
    target: String,
    #[arg(long, default_value_t = 1024 * 1024, help = "Maximum accepted request body size")]
    max_body_bytes: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_INFLATED_BYTES, help = "Largest inflated payload accepted before it is stored as an inflate failure")]
    max_inflated_bytes: u64,
    #[arg(long, default_value_t = 30_000, help = "Timeout for forwarded upstream calls")]
    upstream_timeout_ms: u64,
}

fn run_serve(args: ServeArgs) -> Result<(), Error> {
    let config = serve::ServeConfig {
        bind: args.bind,
        allow_non_loopback: args.allow_non_loopback,
        target: args.target,
        max_body_bytes: args.max_body_bytes,
        max_inflated_bytes: args.max_inflated_bytes,
        upstream_timeout_ms: args.upstream_timeout_ms,
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;
    runtime.block_on(serve::serve(config))
}

fn run_decode(
    payload: Option<String>,
    formatted: bool,
    max_inflated_bytes: u64,
) -> Result<(), Error> {
    let payload = match payload {
        None => read_stdin()?,
        Some(text) if text == "-" => read_stdin()?,
        Some(text) => text,
    };
    let inspector = Inspector::new().with_max_inflated_bytes(max_inflated_bytes);
    let outcome = inspector.record_payload(&payload);
    let entry = inspector.get(outcome.id).ok_or_else(|| {
        Error::new(ErrorKind::Internal)
            .with_message("decoded entry missing from store")
            .with_id(outcome.id)
    })?;

    if formatted {
        println!("{}", entry.formatted);
    } else {
        emit_json(json!({ "request": entry }));
    }
    Ok(())
}

fn read_stdin() -> Result<String, Error> {
    let mut text = String::new();
    io::stdin().read_to_string(&mut text).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read payload from stdin")
            .with_source(err)
    })?;
    Ok(strip_line_ending(text))
}

/// Drops the one line ending a shell pipe adds; everything else is payload.
fn strip_line_ending(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
        ErrorKind::Upstream => "upstream request failed".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(url) = err.url() {
        inner.insert("url".to_string(), json!(url));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(url) = err.url() {
        lines.push(format!("url: {url}"));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{error_json, error_text, strip_line_ending};
    use wa_inspect::api::{Error, ErrorKind};

    #[test]
    fn error_json_carries_kind_message_and_hint() {
        let err = Error::new(ErrorKind::Usage)
            .with_message("bad flag")
            .with_hint("try --help");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "Usage");
        assert_eq!(value["error"]["message"], "bad flag");
        assert_eq!(value["error"]["hint"], "try --help");
        assert!(value["error"].get("causes").is_none());
    }

    #[test]
    fn error_text_falls_back_to_kind_label() {
        let err = Error::new(ErrorKind::Upstream).with_url("https://example.com/x");
        assert_eq!(
            error_text(&err),
            "error: upstream request failed\nurl: https://example.com/x"
        );
    }

    #[test]
    fn only_one_trailing_line_ending_is_dropped() {
        assert_eq!(strip_line_ending("abc\n".to_string()), "abc");
        assert_eq!(strip_line_ending("abc\r\n".to_string()), "abc");
        assert_eq!(strip_line_ending(" abc \n\n".to_string()), " abc \n");
        assert_eq!(strip_line_ending("abc\r".to_string()), "abc\r");
    }
}
