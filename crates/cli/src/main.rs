mod batch;

use clap::{error::ErrorKind, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;
use torsion_a_core::{aggregate, read_collection, CollectionError, ScoreError};
use torsion_a_extract::{
    hash_file, resolve_program, ExtractError, ProgramSource, DSSR_BIN_ENV, PREDICTOR_BIN_ENV,
};
use torsion_a_report::{
    blake3_hex, config_hash, default_scoring_config, jcs_bytes, load_config, validate,
    AuditTrace, AuditWarning, ConfigError, ConfigSource, HashesTrace, ResultTable, RunSummary,
    ScoringConfig, ToolTrace, WriteError, METRIC_MAE,
};

const INPUTS_HASH_UNAVAILABLE: &str = "UNAVAILABLE";

#[derive(Parser, Debug)]
#[command(name = "torsion-a", version, about = "Torsional-angle MAE scoring for RNA structures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short = 'j', global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    threads: Option<usize>,

    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(long, global = true)]
    dssr_bin: Option<PathBuf>,

    #[arg(long, global = true)]
    predictor_bin: Option<PathBuf>,

    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// RNA-Torsion-A: extracted angles against predictions from the same sequence.
    Score {
        input: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        details: Option<PathBuf>,
        /// Persisted collection used instead of running the predictor.
        #[arg(long)]
        precomputed: Option<PathBuf>,
    },
    /// MAE between a native structure and predicted structures.
    Compare {
        pred: PathBuf,
        #[arg(long)]
        native: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        details: Option<PathBuf>,
    },
    /// Converts structures into a persisted angle collection.
    Extract {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// MAE between two persisted angle collections.
    Mae {
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        predicted: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug)]
enum AppErrorKind {
    Usage,
    NoInput,
    Dependency,
    Internal,
}

#[derive(Clone, Debug)]
struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    details: Box<Value>,
    data: Option<Box<Value>>,
}

impl AppError {
    fn new(kind: AppErrorKind, code: &'static str, message: String) -> Self {
        Self {
            kind,
            code,
            message,
            details: Box::new(Value::Null),
            data: None,
        }
    }

    fn usage(message: String) -> Self {
        Self::new(AppErrorKind::Usage, "CLI_USAGE", message)
    }

    fn no_input(message: String) -> Self {
        Self::new(AppErrorKind::NoInput, "NO_INPUT", message)
    }

    fn dependency(code: &'static str, message: String) -> Self {
        Self::new(AppErrorKind::Dependency, code, message)
    }

    fn internal(message: String) -> Self {
        Self::new(AppErrorKind::Internal, "INTERNAL_ERROR", message)
    }

    fn exit_code(&self) -> i32 {
        match self.kind {
            AppErrorKind::Usage => 1,
            AppErrorKind::NoInput | AppErrorKind::Dependency | AppErrorKind::Internal => 2,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Box::new(details);
        self
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(Box::new(data));
        self
    }
}

#[derive(Serialize)]
struct JsonEnvelope {
    status: String,
    error: Option<ErrorEnvelope>,
    audit_trace: AuditTrace,
    data: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
struct ErrorEnvelope {
    code: String,
    message: String,
    details: Value,
}

/// A tool program after config, flag and environment resolution.
#[derive(Clone, Debug)]
struct ResolvedTool {
    program: PathBuf,
    source: ProgramSource,
}

/// Effective settings for one invocation.
struct RunContext {
    json: bool,
    dry_run: bool,
    threads: Option<usize>,
    config: ScoringConfig,
    config_source: ConfigSource,
    config_hash: String,
    dssr: ResolvedTool,
    predictor: ResolvedTool,
}

impl RunContext {
    fn dssr_trace(&self) -> ToolTrace {
        ToolTrace {
            name: self.config.extractor.name.clone(),
            program: self.dssr.program.display().to_string(),
            program_source: self.dssr.source.as_str().to_string(),
            model_id: self.config.extractor.model_id.clone(),
        }
    }

    fn predictor_trace(&self, precomputed: Option<&Path>) -> ToolTrace {
        match precomputed {
            Some(path) => ToolTrace {
                name: "precomputed".to_string(),
                program: path.display().to_string(),
                program_source: "collection".to_string(),
                model_id: None,
            },
            None => ToolTrace {
                name: self.config.predictor.name.clone(),
                program: self.predictor.program.display().to_string(),
                program_source: self.predictor.source.as_str().to_string(),
                model_id: self.config.predictor.model_id.clone(),
            },
        }
    }

    fn audit_trace(
        &self,
        tools: Vec<ToolTrace>,
        inputs_hash: Option<String>,
        warnings: Vec<AuditWarning>,
    ) -> AuditTrace {
        AuditTrace {
            metric_algo_id: self.config.metric_algo_id.clone(),
            length_mismatch_policy: self.config.length_mismatch_policy.clone(),
            tools,
            hashes: HashesTrace {
                config_hash: self.config_hash.clone(),
                inputs_hash: inputs_hash.unwrap_or_else(|| INPUTS_HASH_UNAVAILABLE.to_string()),
            },
            warnings,
            config_source: self.config_source,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    let args: Vec<String> = env::args().collect();
    let wants_json = args.iter().any(|arg| arg == "--json" || arg == "-j");

    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            let json = cli.json || wants_json;
            match run(cli) {
                Ok(envelope) => {
                    if json {
                        print_json(&envelope);
                    }
                    std::process::exit(0);
                }
                Err(err) => {
                    let exit_code = err.exit_code();
                    if json {
                        print_json(&error_envelope(&err));
                    } else {
                        eprintln!("{}", err.message);
                    }
                    std::process::exit(exit_code);
                }
            }
        }
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                std::process::exit(0);
            }
            _ => {
                if wants_json {
                    let usage = AppError::usage(err.to_string());
                    print_json(&error_envelope(&usage));
                } else {
                    let _ = err.print();
                }
                std::process::exit(1);
            }
        },
    }
}

fn run(cli: Cli) -> Result<JsonEnvelope, AppError> {
    let ctx = build_context(&cli)?;
    match cli.command {
        Commands::Score {
            input,
            out,
            details,
            precomputed,
        } => batch::run(
            &ctx,
            batch::BatchCommand {
                input,
                out,
                details,
                mode: batch::CommandMode::Score { precomputed },
            },
        ),
        Commands::Compare {
            pred,
            native,
            out,
            details,
        } => batch::run(
            &ctx,
            batch::BatchCommand {
                input: pred,
                out,
                details,
                mode: batch::CommandMode::Compare { native },
            },
        ),
        Commands::Extract { input, out } => batch::run(
            &ctx,
            batch::BatchCommand {
                input,
                out: Some(out),
                details: None,
                mode: batch::CommandMode::Extract,
            },
        ),
        Commands::Mae {
            reference,
            predicted,
            out,
        } => mae(&ctx, &reference, &predicted, out.as_deref()),
    }
}

fn build_context(cli: &Cli) -> Result<RunContext, AppError> {
    if matches!(cli.threads, Some(0)) {
        return Err(AppError::usage("--threads must be >= 1".to_string()));
    }
    if matches!(cli.timeout_secs, Some(0)) {
        return Err(AppError::usage("--timeout-secs must be >= 1".to_string()));
    }

    let loaded = load_config(cli.config.as_deref()).map_err(map_config_error)?;
    let mut config = loaded.config;
    if let Some(timeout) = cli.timeout_secs {
        config.extractor.timeout_secs = timeout;
        config.predictor.timeout_secs = timeout;
    }
    if let Some(bin) = &cli.dssr_bin {
        config.extractor.program = bin.display().to_string();
    }
    if let Some(bin) = &cli.predictor_bin {
        config.predictor.program = bin.display().to_string();
    }
    validate(&config).map_err(map_config_error)?;

    let dssr = resolve_tool(&config, cli.dssr_bin.as_deref(), true);
    let predictor = resolve_tool(&config, cli.predictor_bin.as_deref(), false);
    log::debug!(
        "dssr program {} ({}), predictor program {} ({})",
        dssr.program.display(),
        dssr.source.as_str(),
        predictor.program.display(),
        predictor.source.as_str()
    );

    Ok(RunContext {
        json: cli.json,
        dry_run: cli.dry_run,
        threads: cli.threads,
        config_hash: config_hash(&config),
        config,
        config_source: loaded.source,
        dssr,
        predictor,
    })
}

fn resolve_tool(config: &ScoringConfig, flag: Option<&Path>, extractor: bool) -> ResolvedTool {
    if let Some(path) = flag {
        return ResolvedTool {
            program: path.to_path_buf(),
            source: ProgramSource::Explicit,
        };
    }
    let (program, source) = if extractor {
        resolve_program(&config.extractor, DSSR_BIN_ENV)
    } else {
        resolve_program(&config.predictor, PREDICTOR_BIN_ENV)
    };
    ResolvedTool { program, source }
}

fn mae(
    ctx: &RunContext,
    reference: &Path,
    predicted: &Path,
    out: Option<&Path>,
) -> Result<JsonEnvelope, AppError> {
    let started = Instant::now();
    let reference_load = read_collection(reference).map_err(map_collection_error)?;
    let predicted_load = read_collection(predicted).map_err(map_collection_error)?;

    let inputs_hash = blake3_hex(&jcs_bytes(&json!({
        "reference": hash_file(reference).map_err(map_extract_error)?,
        "predicted": hash_file(predicted).map_err(map_extract_error)?,
    })));

    let mut warnings = Vec::new();
    for (name, err) in reference_load
        .failures
        .iter()
        .chain(predicted_load.failures.iter())
    {
        warnings.push(AuditWarning {
            warning_type: err.code().to_string(),
            entity: name.clone(),
            message: err.to_string(),
        });
    }

    if ctx.dry_run {
        let matched: Vec<&String> = reference_load
            .entities
            .keys()
            .filter(|name| predicted_load.entities.contains_key(*name))
            .collect();
        if !ctx.json {
            for name in &matched {
                println!("{}", name);
            }
            println!("dry run: {} matched entities", matched.len());
        }
        return Ok(JsonEnvelope {
            status: "OK".to_string(),
            error: None,
            audit_trace: ctx.audit_trace(Vec::new(), Some(inputs_hash), warnings),
            data: Some(json!({ "dry_run": true, "matched": matched })),
        });
    }

    let scores = aggregate(&reference_load.entities, &predicted_load.entities);
    let mut table = ResultTable::new(METRIC_MAE);
    for (name, score) in &scores {
        if let Err(err) = &score.score {
            warnings.push(score_warning(name, err));
        }
        table.push(name.clone(), score.value());
    }

    let unmatched = reference_load.entities.len() + predicted_load.entities.len() - 2 * scores.len();
    if unmatched > 0 {
        log::info!("{} entities present in only one collection", unmatched);
    }
    let summary = RunSummary {
        inputs_total: reference_load.entities.len() + reference_load.failures.len(),
        rows: table.len(),
        scored: table.scored(),
        unscored: table.len() - table.scored(),
        omitted: reference_load.failures.len() + predicted_load.failures.len(),
        duration_ms: duration_ms(started),
    };

    emit_table(ctx, &table, out, &summary)?;
    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        audit_trace: ctx.audit_trace(Vec::new(), Some(inputs_hash), warnings),
        data: Some(json!({
            "table": table,
            "summary": summary,
            "out_path": out,
        })),
    })
}

fn score_warning(entity: &str, err: &ScoreError) -> AuditWarning {
    AuditWarning {
        warning_type: err.code().to_string(),
        entity: entity.to_string(),
        message: err.to_string(),
    }
}

/// Writes the table to `out`, or to stdout outside JSON mode.
fn emit_table(
    ctx: &RunContext,
    table: &ResultTable,
    out: Option<&Path>,
    summary: &RunSummary,
) -> Result<(), AppError> {
    if let Some(path) = out {
        table.write_csv(path).map_err(map_write_error)?;
    } else if !ctx.json {
        print!("{}", table.to_csv());
    }
    if !ctx.json {
        let line = format!(
            "scored={} unscored={} omitted={} rows={}",
            summary.scored, summary.unscored, summary.omitted, summary.rows
        );
        match out {
            Some(path) => println!("{} out={}", line, path.display()),
            None => eprintln!("{}", line),
        }
    }
    Ok(())
}

fn duration_ms(started: Instant) -> u64 {
    let millis = started.elapsed().as_millis();
    if millis > u128::from(u64::MAX) {
        u64::MAX
    } else {
        millis as u64
    }
}

fn fallback_audit_trace() -> AuditTrace {
    let config = default_scoring_config();
    AuditTrace {
        metric_algo_id: config.metric_algo_id.clone(),
        length_mismatch_policy: config.length_mismatch_policy.clone(),
        tools: Vec::new(),
        hashes: HashesTrace {
            config_hash: config_hash(&config),
            inputs_hash: INPUTS_HASH_UNAVAILABLE.to_string(),
        },
        warnings: Vec::new(),
        config_source: ConfigSource::Default,
    }
}

fn error_envelope(err: &AppError) -> JsonEnvelope {
    JsonEnvelope {
        status: "ERROR".to_string(),
        error: Some(ErrorEnvelope {
            code: err.code.to_string(),
            message: err.message.clone(),
            details: (*err.details).clone(),
        }),
        audit_trace: fallback_audit_trace(),
        data: err.data.as_deref().cloned(),
    }
}

fn print_json(envelope: &JsonEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialize json: {}", err),
    }
}

fn map_config_error(err: ConfigError) -> AppError {
    let details = match &err {
        ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => json!({ "path": path }),
        ConfigError::Invalid { .. } => Value::Null,
    };
    AppError::dependency(err.code(), err.to_string()).with_details(details)
}

fn map_collection_error(err: CollectionError) -> AppError {
    let path = match &err {
        CollectionError::NotJson { path }
        | CollectionError::Io { path, .. }
        | CollectionError::Json { path, .. } => path.clone(),
    };
    AppError::no_input(err.to_string()).with_details(json!({
        "reason": err.code(),
        "path": path,
    }))
}

fn map_write_error(err: WriteError) -> AppError {
    AppError::dependency("OUTPUT_WRITE", err.to_string()).with_details(json!({ "path": err.path }))
}

fn map_extract_error(err: ExtractError) -> AppError {
    let envelope = extract_error_envelope(&err);
    AppError::dependency(err.code(), envelope.message).with_details(envelope.details)
}

fn extract_error_envelope(err: &ExtractError) -> ErrorEnvelope {
    let details = match err {
        ExtractError::InputMissing { path } => json!({ "path": path }),
        ExtractError::Spawn { program, .. } | ExtractError::EmptyOutput { program } => {
            json!({ "program": program })
        }
        ExtractError::Timeout {
            program,
            timeout_secs,
        } => json!({ "program": program, "timeout_secs": timeout_secs }),
        ExtractError::ToolFailed {
            program,
            status,
            stderr,
        } => json!({ "program": program, "status": status, "stderr": stderr }),
        ExtractError::OutputParse { program, message } => {
            json!({ "program": program, "reason": message })
        }
        ExtractError::Angle(_) => Value::Null,
        ExtractError::NotPrecomputed { name } => json!({ "entity": name }),
        ExtractError::Io { path, .. } => json!({ "path": path }),
    };
    ErrorEnvelope {
        code: err.code().to_string(),
        message: err.to_string(),
        details,
    }
}

fn score_error_envelope(err: &ScoreError) -> ErrorEnvelope {
    let details = match err {
        ScoreError::LengthMismatch {
            reference,
            predicted,
        } => json!({ "reference_len": reference, "predicted_len": predicted }),
        ScoreError::NoScorableAngles => Value::Null,
    };
    ErrorEnvelope {
        code: err.code().to_string(),
        message: err.to_string(),
        details,
    }
}
