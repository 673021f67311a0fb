use crate::{
    duration_ms, emit_table, extract_error_envelope, map_collection_error, map_extract_error,
    score_error_envelope, AppError, ErrorEnvelope, JsonEnvelope, RunContext,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use torsion_a_core::{
    read_collection, score_entity, write_collection, AngleMae, AngleName, AngleVector,
    EntityCollection,
};
use torsion_a_extract::{
    discover_inputs, entity_name, file_label, hash_file, AnglePredictor, CommandPredictor,
    DssrExtractor, GeometryExtractor, PrecomputedPredictor,
};
use torsion_a_report::{
    blake3_hex, jcs_bytes, AuditWarning, ResultTable, RunSummary, ToolTrace, METRIC_MAE,
    METRIC_TORSION_A,
};

pub(super) enum CommandMode {
    Score { precomputed: Option<PathBuf> },
    Compare { native: PathBuf },
    Extract,
}

pub(super) struct BatchCommand {
    pub input: PathBuf,
    pub out: Option<PathBuf>,
    pub details: Option<PathBuf>,
    pub mode: CommandMode,
}

#[derive(Clone, Debug)]
struct EntityTask {
    index: usize,
    path: PathBuf,
    label: String,
    name: String,
}

#[derive(Clone, Debug)]
enum PredictorConfig {
    Command(CommandPredictor),
    Precomputed(PrecomputedPredictor),
}

impl PredictorConfig {
    fn build(&self) -> Box<dyn AnglePredictor + Send> {
        match self {
            Self::Command(predictor) => Box::new(predictor.clone()),
            Self::Precomputed(predictor) => Box::new(predictor.clone()),
        }
    }
}

#[derive(Clone, Debug)]
enum WorkerMode<'a> {
    Score(PredictorConfig),
    Compare(&'a AngleVector),
    Extract,
}

#[derive(Clone, Debug)]
struct WorkerConfig<'a> {
    extractor: DssrExtractor,
    mode: WorkerMode<'a>,
}

enum Stage<'a> {
    Score(Box<dyn AnglePredictor + Send>),
    Compare(&'a AngleVector),
    Extract,
}

/// Collaborators owned by one worker thread.
struct WorkerState<'a> {
    extractor: DssrExtractor,
    stage: Stage<'a>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum RowStatus {
    Scored,
    Unscored,
    Omitted,
    Extracted,
}

#[derive(Serialize)]
struct EntityRow {
    index: usize,
    rna: String,
    entity: String,
    status: RowStatus,
    inputs_hash: Option<String>,
    score: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    per_angle: BTreeMap<AngleName, AngleMae>,
    error: Option<ErrorEnvelope>,
    #[serde(skip)]
    vector: Option<AngleVector>,
}

impl EntityRow {
    fn base(task: &EntityTask, status: RowStatus, inputs_hash: Option<String>) -> Self {
        Self {
            index: task.index,
            rna: task.label.clone(),
            entity: task.name.clone(),
            status,
            inputs_hash,
            score: None,
            per_angle: BTreeMap::new(),
            error: None,
            vector: None,
        }
    }

    fn omitted(task: &EntityTask, inputs_hash: Option<String>, error: ErrorEnvelope) -> Self {
        let mut row = Self::base(task, RowStatus::Omitted, inputs_hash);
        row.error = Some(error);
        row
    }

    fn in_table(&self) -> bool {
        matches!(self.status, RowStatus::Scored | RowStatus::Unscored)
    }

    fn warning(&self) -> Option<AuditWarning> {
        self.error.as_ref().map(|error| AuditWarning {
            warning_type: error.code.clone(),
            entity: self.rna.clone(),
            message: error.message.clone(),
        })
    }
}

pub(super) fn run(ctx: &RunContext, command: BatchCommand) -> Result<JsonEnvelope, AppError> {
    let BatchCommand {
        input,
        out,
        details,
        mode,
    } = command;

    let started = Instant::now();
    let inputs = discover_inputs(&input, &ctx.config.input_extensions).map_err(map_extract_error)?;
    if inputs.is_empty() {
        return Err(AppError::no_input(format!(
            "no input structures found at {}",
            input.display()
        ))
        .with_data(json!({
            "input": input,
            "extensions": ctx.config.input_extensions,
        })));
    }

    let extractor = DssrExtractor::new(ctx.config.extractor.clone(), ctx.dssr.program.clone());
    let mut tools = vec![ctx.dssr_trace()];
    if let CommandMode::Score { precomputed } = &mode {
        tools.push(ctx.predictor_trace(precomputed.as_deref()));
    }

    if ctx.dry_run {
        return Ok(dry_run(ctx, &inputs, tools));
    }

    let tasks: Vec<EntityTask> = inputs
        .iter()
        .enumerate()
        .map(|(index, path)| EntityTask {
            index,
            path: path.clone(),
            label: file_label(path),
            name: entity_name(path),
        })
        .collect();

    let native;
    let mut native_hash = None;
    let worker_mode = match &mode {
        CommandMode::Score { precomputed } => {
            WorkerMode::Score(predictor_config(ctx, precomputed.as_deref())?)
        }
        CommandMode::Compare { native: native_path } => {
            native = extractor
                .extract(native_path)
                .map_err(|err| native_failure(native_path, err))?;
            native_hash = Some(hash_file(native_path).map_err(map_extract_error)?);
            WorkerMode::Compare(&native)
        }
        CommandMode::Extract => WorkerMode::Extract,
    };
    let worker_config = WorkerConfig {
        extractor,
        mode: worker_mode,
    };

    let details_file = match &details {
        Some(path) => Some(File::create(path).map_err(|err| {
            AppError::dependency(
                "OUTPUT_WRITE",
                format!("failed to open details file {}: {}", path.display(), err),
            )
        })?),
        None => None,
    };

    let rows = process_entities(ctx, tasks, &worker_config, details_file)?;

    let warnings: Vec<AuditWarning> = rows.iter().filter_map(EntityRow::warning).collect();
    let omitted = rows
        .iter()
        .filter(|row| row.status == RowStatus::Omitted)
        .count();
    if omitted > 0 {
        log::warn!("{} of {} entities omitted: construction failed", omitted, rows.len());
    }
    let inputs_hash = run_inputs_hash(&rows, native_hash.as_deref());

    if let CommandMode::Extract = mode {
        return finish_extract(ctx, rows, out, tools, inputs_hash, warnings, started);
    }

    let metric = match mode {
        CommandMode::Score { .. } => METRIC_TORSION_A,
        _ => METRIC_MAE,
    };
    let mut table = ResultTable::new(metric);
    for row in rows.iter().filter(|row| row.in_table()) {
        table.push(row.rna.clone(), row.score);
    }
    let summary = RunSummary {
        inputs_total: rows.len(),
        rows: table.len(),
        scored: table.scored(),
        unscored: table.len() - table.scored(),
        omitted,
        duration_ms: duration_ms(started),
    };

    emit_table(ctx, &table, out.as_deref(), &summary)?;
    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        audit_trace: ctx.audit_trace(tools, Some(inputs_hash), warnings),
        data: Some(json!({
            "table": table,
            "summary": summary,
            "out_path": out,
            "details_path": details,
        })),
    })
}

fn predictor_config(
    ctx: &RunContext,
    precomputed: Option<&Path>,
) -> Result<PredictorConfig, AppError> {
    match precomputed {
        Some(path) => {
            let load = read_collection(path).map_err(map_collection_error)?;
            log::info!(
                "loaded {} precomputed predictions from {}",
                load.entities.len(),
                path.display()
            );
            Ok(PredictorConfig::Precomputed(PrecomputedPredictor::new(
                load.entities,
            )))
        }
        None => Ok(PredictorConfig::Command(CommandPredictor::new(
            ctx.config.predictor.clone(),
            ctx.predictor.program.clone(),
        ))),
    }
}

fn native_failure(path: &Path, err: torsion_a_extract::ExtractError) -> AppError {
    let envelope = extract_error_envelope(&err);
    AppError::dependency(
        "NATIVE_EXTRACTION_FAILED",
        format!("native structure {}: {}", path.display(), envelope.message),
    )
    .with_details(json!({
        "path": path,
        "reason": envelope.code,
        "details": envelope.details,
    }))
}

fn dry_run(ctx: &RunContext, inputs: &[PathBuf], tools: Vec<ToolTrace>) -> JsonEnvelope {
    if !ctx.json {
        for path in inputs {
            println!("{}", path.display());
        }
        for tool in &tools {
            println!("{}: {} ({})", tool.name, tool.program, tool.program_source);
        }
        println!("dry run: {} input(s)", inputs.len());
    }
    JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        audit_trace: ctx.audit_trace(tools, None, Vec::new()),
        data: Some(json!({
            "dry_run": true,
            "inputs": inputs,
        })),
    }
}

fn process_entities(
    ctx: &RunContext,
    tasks: Vec<EntityTask>,
    worker_config: &WorkerConfig<'_>,
    details_file: Option<File>,
) -> Result<Vec<EntityRow>, AppError> {
    let progress = build_progress_bar(tasks.len());
    let pool = build_thread_pool(ctx.threads)?;
    let worker_count = pool.current_num_threads().max(1).min(tasks.len().max(1));

    let (task_tx, task_rx) = unbounded::<EntityTask>();
    let (result_tx, result_rx) = unbounded::<EntityRow>();
    for task in tasks {
        task_tx
            .send(task)
            .map_err(|_| AppError::internal("entity queue closed unexpectedly".to_string()))?;
    }
    drop(task_tx);

    let writer_handle = thread::spawn(move || collect_rows_in_order(details_file, result_rx));

    pool.scope(|scope| {
        for _ in 0..worker_count {
            let worker_task_rx = task_rx.clone();
            let worker_result_tx = result_tx.clone();
            let worker_progress = progress.clone();
            let config = worker_config.clone();
            scope.spawn(move |_| {
                run_worker(worker_task_rx, worker_result_tx, worker_progress, config);
            });
        }
    });
    drop(result_tx);

    let rows = writer_handle
        .join()
        .map_err(|_| AppError::internal("entity writer thread panicked".to_string()))??;
    progress.finish_with_message(format!("processed {} entities", rows.len()));
    Ok(rows)
}

fn build_thread_pool(threads: Option<usize>) -> Result<rayon::ThreadPool, AppError> {
    let builder = rayon::ThreadPoolBuilder::new();
    let builder = if let Some(n) = threads {
        builder.num_threads(n)
    } else {
        builder
    };
    builder
        .build()
        .map_err(|err| AppError::internal(format!("failed to build thread pool: {}", err)))
}

fn build_progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} entities ({percent}%)",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn run_worker(
    task_rx: Receiver<EntityTask>,
    result_tx: Sender<EntityRow>,
    progress: ProgressBar,
    config: WorkerConfig<'_>,
) {
    let state = WorkerState::new(config);
    while let Ok(task) = task_rx.recv() {
        let row = state.process(&task);
        if result_tx.send(row).is_err() {
            break;
        }
        progress.inc(1);
    }
}

impl<'a> WorkerState<'a> {
    fn new(config: WorkerConfig<'a>) -> Self {
        let stage = match config.mode {
            WorkerMode::Score(predictor) => Stage::Score(predictor.build()),
            WorkerMode::Compare(native) => Stage::Compare(native),
            WorkerMode::Extract => Stage::Extract,
        };
        Self {
            extractor: config.extractor,
            stage,
        }
    }

    fn process(&self, task: &EntityTask) -> EntityRow {
        let inputs_hash = match hash_file(&task.path) {
            Ok(hash) => hash,
            Err(err) => return EntityRow::omitted(task, None, extract_error_envelope(&err)),
        };
        let extracted = match self.extractor.extract(&task.path) {
            Ok(vector) => vector,
            Err(err) => {
                log::warn!("{}: skipped, {}", task.label, err);
                return EntityRow::omitted(task, Some(inputs_hash), extract_error_envelope(&err));
            }
        };

        let (reference, predicted) = match &self.stage {
            Stage::Extract => {
                let mut row = EntityRow::base(task, RowStatus::Extracted, Some(inputs_hash));
                row.vector = Some(extracted);
                return row;
            }
            Stage::Compare(native) => (*native, extracted),
            Stage::Score(predictor) => match predictor.predict(&task.name, extracted.sequence()) {
                Ok(predicted) => {
                    return score_row(task, inputs_hash, &extracted, &predicted);
                }
                Err(err) => {
                    log::warn!("{}: prediction failed, {}", task.label, err);
                    return EntityRow::omitted(
                        task,
                        Some(inputs_hash),
                        extract_error_envelope(&err),
                    );
                }
            },
        };
        score_row(task, inputs_hash, reference, &predicted)
    }
}

fn score_row(
    task: &EntityTask,
    inputs_hash: String,
    reference: &AngleVector,
    predicted: &AngleVector,
) -> EntityRow {
    let scored = score_entity(&task.label, reference, predicted);
    let status = if scored.score.is_ok() {
        RowStatus::Scored
    } else {
        RowStatus::Unscored
    };
    let mut row = EntityRow::base(task, status, Some(inputs_hash));
    row.score = scored.value();
    row.error = scored.score.as_ref().err().map(score_error_envelope);
    row.per_angle = scored.per_angle;
    row
}

/// Re-orders rows by input index and streams them to the details file.
fn collect_rows_in_order(
    details_file: Option<File>,
    result_rx: Receiver<EntityRow>,
) -> Result<Vec<EntityRow>, AppError> {
    let mut writer = details_file.map(BufWriter::new);
    let mut next_expected = 0usize;
    let mut buffer = BTreeMap::<usize, EntityRow>::new();
    let mut rows = Vec::new();

    while let Ok(row) = result_rx.recv() {
        buffer.insert(row.index, row);
        while let Some(row) = buffer.remove(&next_expected) {
            if let Some(writer) = writer.as_mut() {
                write_detail_line(writer, &row)?;
            }
            rows.push(row);
            next_expected = next_expected.saturating_add(1);
        }
    }

    if !buffer.is_empty() {
        return Err(AppError::internal(
            "writer stopped before all entities were flushed".to_string(),
        ));
    }
    if let Some(writer) = writer.as_mut() {
        writer.flush().map_err(|err| {
            AppError::dependency("OUTPUT_WRITE", format!("failed to flush details: {}", err))
        })?;
    }
    Ok(rows)
}

fn write_detail_line<W: Write>(writer: &mut W, row: &EntityRow) -> Result<(), AppError> {
    serde_json::to_writer(&mut *writer, row).map_err(|err| {
        AppError::internal(format!("failed to serialize entity {}: {}", row.index, err))
    })?;
    writer.write_all(b"\n").map_err(|err| {
        AppError::dependency(
            "OUTPUT_WRITE",
            format!("failed to write details row {}: {}", row.index, err),
        )
    })
}

fn run_inputs_hash(rows: &[EntityRow], native_hash: Option<&str>) -> String {
    let files: Vec<(&str, Option<&str>)> = rows
        .iter()
        .map(|row| (row.rna.as_str(), row.inputs_hash.as_deref()))
        .collect();
    blake3_hex(&jcs_bytes(&json!({
        "native": native_hash,
        "inputs": files,
    })))
}

fn finish_extract(
    ctx: &RunContext,
    rows: Vec<EntityRow>,
    out: Option<PathBuf>,
    tools: Vec<ToolTrace>,
    inputs_hash: String,
    warnings: Vec<AuditWarning>,
    started: Instant,
) -> Result<JsonEnvelope, AppError> {
    let inputs_total = rows.len();
    let mut collection = EntityCollection::new();
    for row in rows {
        if let Some(vector) = row.vector {
            if collection.insert(row.entity.clone(), vector).is_some() {
                log::warn!("{}: duplicate entity name, keeping {}", row.entity, row.rna);
            }
        }
    }

    let out = out.ok_or_else(|| AppError::usage("extract requires --out".to_string()))?;
    let written = write_collection(&out, &collection).map_err(|err| {
        AppError::dependency("OUTPUT_WRITE", err.to_string()).with_details(json!({
            "path": out,
            "reason": err.code(),
        }))
    })?;

    let summary = RunSummary {
        inputs_total,
        rows: collection.len(),
        scored: 0,
        unscored: 0,
        omitted: inputs_total - collection.len(),
        duration_ms: duration_ms(started),
    };
    if !ctx.json {
        println!(
            "extracted={} omitted={} out={}",
            summary.rows,
            summary.omitted,
            written.display()
        );
    }
    Ok(JsonEnvelope {
        status: "OK".to_string(),
        error: None,
        audit_trace: ctx.audit_trace(tools, Some(inputs_hash), warnings),
        data: Some(json!({
            "summary": summary,
            "out_path": written,
            "entities": collection.keys().collect::<Vec<_>>(),
        })),
    })
}
