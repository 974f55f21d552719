//! evalguard - sandboxed expression evaluation tool
//!
//! The `evalguard` command evaluates expressions against a demo host.
//!
//! ## Commands
//!
//! - `eval`: Evaluate one expression and print the JSON response
//! - `serve`: Line-delimited JSON requests on stdin, responses on stdout
//! - `check`: Run only the security policy
//! - `bindings`: List the names an expression can reach

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, Level};

use evalguard_core::{
    EvalRequest, ExpressionSandbox, OutputFormat, PolicyVerdict, ReturnTypeHint, SandboxConfig,
    METRICS,
};

#[derive(Parser)]
#[command(name = "evalguard")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sandboxed expression evaluation for live services", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Sandbox configuration file (TOML)
    #[arg(short, long, global = true, env = "EVALGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one expression against the demo host
    Eval {
        /// The expression
        expression: String,

        /// Timeout in seconds (default from config)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output format: raw, json or descriptive
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,

        /// Return type hint: auto, string, number, boolean, object or collection
        #[arg(long, default_value = "auto")]
        hint: ReturnTypeHint,

        /// Omit the stack excerpt from error responses
        #[arg(long)]
        no_stack_trace: bool,
    },

    /// Serve line-delimited JSON requests from stdin
    Serve,

    /// Check an expression against the security policy only
    Check {
        /// The expression
        expression: String,
    },

    /// List the available bindings
    Bindings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    evalguard_core::init_tracing(cli.log_json, level);

    let config = load_config(cli.config.as_ref())?;
    let context = demo::context().context("Failed to build demo context")?;
    let sandbox = ExpressionSandbox::new(config, context).context("Invalid sandbox setup")?;

    match cli.command {
        Commands::Eval {
            expression,
            timeout,
            format,
            hint,
            no_stack_trace,
        } => {
            let mut request = EvalRequest::new(expression).with_format(format).with_hint(hint);
            request.timeout_seconds = timeout;
            if no_stack_trace {
                request = request.without_stack_trace();
            }
            cmd_eval(&sandbox, request).await
        }
        Commands::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            let served = cmd_serve(&sandbox, stdin, tokio::io::stdout()).await?;
            info!(served, "input closed");
            METRICS.flush();
            Ok(())
        }
        Commands::Check { expression } => cmd_check(&sandbox, &expression),
        Commands::Bindings => cmd_bindings(&sandbox),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<SandboxConfig> {
    match path {
        Some(path) => SandboxConfig::from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(SandboxConfig::default()),
    }
}

async fn cmd_eval(sandbox: &ExpressionSandbox, request: EvalRequest) -> Result<()> {
    let response = sandbox.evaluate(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

/// Answer one request per input line until EOF. Returns the number of
/// responses written.
async fn cmd_serve<R, W>(sandbox: &ExpressionSandbox, reader: R, mut writer: W) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<EvalRequest>(&line) {
            Ok(request) => sandbox.evaluate(request).await,
            Err(e) => sandbox.reject_malformed(format!("malformed request: {e}")),
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        writer.write_all(&out).await.context("Failed to write response")?;
        writer.flush().await?;
        served += 1;
    }
    Ok(served)
}

#[derive(Serialize)]
struct CheckOutput {
    allowed: bool,
    verdict: PolicyVerdict,
}

fn cmd_check(sandbox: &ExpressionSandbox, expression: &str) -> Result<()> {
    let verdict = match sandbox.validate_only(expression) {
        Ok(()) => PolicyVerdict::Allowed,
        Err(denial) => PolicyVerdict::Denied {
            category: denial.category,
            reason: denial.reason,
        },
    };
    let output = CheckOutput {
        allowed: verdict.is_allowed(),
        verdict,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cmd_bindings(sandbox: &ExpressionSandbox) -> Result<()> {
    for name in sandbox.bindings() {
        println!("{name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sandbox() -> ExpressionSandbox {
        ExpressionSandbox::new(SandboxConfig::default(), demo::context().unwrap()).unwrap()
    }

    async fn serve(input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        cmd_serve(&sandbox(), input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_serve_answers_each_line() {
        let responses = serve(
            "{\"expression\":\"2+2\"}\n\n{\"expression\":\"registry.byType('Controller').size()\"}\n",
        )
        .await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["result"], 4);
        assert_eq!(responses[1]["result"], 2);
    }

    #[tokio::test]
    async fn test_serve_survives_malformed_lines() {
        let responses = serve("not json\n{\"expression\":\"1\"}\n").await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["success"], false);
        assert_eq!(responses[0]["errorKind"], "InvalidRequest");
        assert_eq!(responses[1]["success"], true);
    }

    #[tokio::test]
    async fn test_demo_host_masks_secrets() {
        let response = sandbox()
            .evaluate(EvalRequest::new("properties.get('db.password')"))
            .await;
        assert_eq!(response.result, Some(serde_json::json!("******")));
    }

    #[tokio::test]
    async fn test_demo_host_error_classified() {
        let response = sandbox()
            .evaluate(EvalRequest::new("registry.byName('orderService').reconcile()"))
            .await;
        assert_eq!(
            response.error_kind,
            Some(evalguard_core::ErrorKind::UnresolvedBinding)
        );
        let stack = response.stack_excerpt.unwrap();
        assert_eq!(stack[0], "app.orders::OrderService.reconcile");
    }

    #[test]
    fn test_check_output_shape() {
        let output = CheckOutput {
            allowed: false,
            verdict: PolicyVerdict::Denied {
                category: evalguard_core::Capability::ProcessControl,
                reason: "process control".into(),
            },
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["verdict"]["denied"]["category"], "process_control");
    }

    #[test]
    fn test_bindings_listed() {
        let names = sandbox().bindings();
        assert_eq!(
            names,
            vec!["clock", "data", "diagnostics", "properties", "registry"]
        );
    }
}
