//! Run the configured pipeline over the input connector
//!
//! Messages are pivoted and transformed on a fixed pool of worker tasks that
//! share one pipeline. Results are written in input order.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use telepivot_core::config::Projection;
use telepivot_core::connectors::{InputConnector, Message, MessageMetadata, OutputConnector};
use telepivot_core::{
    Config, MetricRecord, MetricState, Pipeline, Pivot, TelemetryMessage, default_registry,
};
use tokio::sync::{Mutex, mpsc};

/// Counters reported at the end of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Messages read from the input
    pub messages: usize,
    /// Messages that were not valid telemetry
    pub undecodable: usize,
    /// Records written to the output
    pub records: usize,
    /// Records dropped by a failing step
    pub errors: usize,
    /// Warnings raised along the way
    pub warnings: usize,
}

struct Job {
    sequence: usize,
    message: Message,
}

struct Processed {
    metadata: MessageMetadata,
    records: Vec<Value>,
    errors: usize,
    warnings: usize,
    undecodable: bool,
}

/// Run the run command
pub async fn run(config_path: &str, workers: Option<usize>) -> Result<()> {
    tracing::info!("Loading configuration from {}", config_path);

    let config = Config::load(config_path).context("Failed to load configuration")?;
    tracing::info!("Project: {}", config.project.name);

    let summary = execute(&config, workers).await?;

    tracing::info!(
        messages = summary.messages,
        undecodable = summary.undecodable,
        records = summary.records,
        errors = summary.errors,
        warnings = summary.warnings,
        "Run complete"
    );
    Ok(())
}

/// Process every input message and write the results
pub async fn execute(config: &Config, workers: Option<usize>) -> Result<RunSummary> {
    let registry = default_registry().context("Failed to build transformation registry")?;
    let pipeline = Arc::new(
        config
            .build_pipeline(registry)
            .context("Failed to build pipeline")?,
    );
    let pivot = Arc::new(Pivot::new(config.project.pivot.clone()));
    let projection = config.project.runtime.projection;
    let workers = workers.unwrap_or(config.project.runtime.workers).max(1);
    tracing::debug!(steps = pipeline.len(), workers, "Pipeline ready");

    let mut input = config.input().input();
    let mut output = config.output().output();

    let (job_tx, job_rx) = mpsc::channel::<Job>(workers * 2);
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, Processed)>();

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let job_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let pipeline = Arc::clone(&pipeline);
        let pivot = Arc::clone(&pivot);
        handles.push(tokio::spawn(async move {
            loop {
                let job = job_rx.lock().await.recv().await;
                let Some(job) = job else {
                    break;
                };
                tracing::trace!(worker, sequence = job.sequence, "Processing message");
                let processed = process(&pivot, &pipeline, projection, job.message)?;
                if result_tx.send((job.sequence, processed)).is_err() {
                    break;
                }
            }
            anyhow::Ok(())
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let mut writer = OrderedWriter::default();
    let mut sequence = 0;
    while let Some(message) = input.pull().await.context("Failed to read input")? {
        if job_tx.send(Job { sequence, message }).await.is_err() {
            // every worker has stopped; the join below reports why
            break;
        }
        sequence += 1;
        while let Ok((seq, processed)) = result_rx.try_recv() {
            writer
                .accept(seq, processed, output.as_mut(), input.as_mut())
                .await?;
        }
    }
    drop(job_tx);

    while let Some((seq, processed)) = result_rx.recv().await {
        writer
            .accept(seq, processed, output.as_mut(), input.as_mut())
            .await?;
    }
    for handle in handles {
        handle.await.context("Worker panicked")??;
    }
    output.flush().await.context("Failed to flush output")?;

    Ok(writer.summary)
}

fn process(
    pivot: &Pivot,
    pipeline: &Pipeline,
    projection: Projection,
    message: Message,
) -> Result<Processed> {
    let metadata = message.metadata;
    let telemetry: TelemetryMessage = match serde_json::from_value(message.payload) {
        Ok(telemetry) => telemetry,
        Err(err) => {
            tracing::error!(
                source = metadata.source.as_deref().unwrap_or_default(),
                line = metadata.sequence,
                error = %err,
                "Message is not valid telemetry"
            );
            return Ok(Processed {
                metadata,
                records: Vec::new(),
                errors: 0,
                warnings: 0,
                undecodable: true,
            });
        }
    };

    let state = pipeline
        .run(pivot.pivot_message(&telemetry))
        .with_context(|| format!("Pipeline aborted on '{}'", telemetry.encoding_path))?;

    for warning in &state.warnings {
        tracing::warn!(
            path = %telemetry.encoding_path,
            kind = ?warning.kind,
            fields = ?warning.fields,
            "{}",
            warning.message
        );
    }

    let mut records = Vec::new();
    let mut errors = 0;
    for record in &state.states {
        match record {
            MetricState::Ok { metric, .. } => records.push(project(metric, projection)?),
            MetricState::Error {
                failure, last_good, ..
            } => {
                errors += 1;
                let path = last_good
                    .as_ref()
                    .map(MetricRecord::path)
                    .unwrap_or(telemetry.encoding_path.as_str());
                tracing::error!(
                    step = %failure.step,
                    path,
                    error = %failure.error,
                    "Record dropped"
                );
            }
        }
    }

    Ok(Processed {
        metadata,
        records,
        errors,
        warnings: state.warnings.len(),
        undecodable: false,
    })
}

fn project(metric: &MetricRecord, projection: Projection) -> Result<Value> {
    Ok(match projection {
        Projection::Flat => metric.to_flat_json(),
        Projection::Record => serde_json::to_value(metric)?,
    })
}

/// Releases processed messages to the sink in input order
#[derive(Default)]
struct OrderedWriter {
    next: usize,
    pending: BTreeMap<usize, Processed>,
    summary: RunSummary,
}

impl OrderedWriter {
    async fn accept(
        &mut self,
        sequence: usize,
        processed: Processed,
        output: &mut dyn OutputConnector,
        input: &mut dyn InputConnector,
    ) -> Result<()> {
        self.pending.insert(sequence, processed);
        while let Some(processed) = self.pending.remove(&self.next) {
            self.next += 1;
            self.summary.messages += 1;
            self.summary.errors += processed.errors;
            self.summary.warnings += processed.warnings;
            if processed.undecodable {
                self.summary.undecodable += 1;
                input.nack(&processed.metadata).await?;
                continue;
            }
            for record in processed.records {
                output
                    .push(Message::new(record))
                    .await
                    .context("Failed to write output")?;
                self.summary.records += 1;
            }
            input.ack(&processed.metadata).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telepivot_core::config::PROJECT_FILE;

    const PROJECT: &str = r#"
name: run-test
input:
  type: file
  path: in.jsonl
output:
  type: file
  path: out.jsonl
runtime:
  workers: 3
transformations:
  - kind: convert_to_int
    config:
      leaf_names: [v]
"#;

    fn line(node: &str, v: &str) -> String {
        format!(
            r#"{{"node_id_str":"{node}","encoding_path":"p","data_gpbkv":[{{"fields":[{{"name":"keys","fields":[{{"name":"k","string_value":"{node}"}}]}},{{"name":"content","fields":[{{"name":"v","string_value":"{v}"}}]}}]}}]}}"#
        )
    }

    #[tokio::test]
    async fn test_execute_keeps_input_order_and_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROJECT_FILE), PROJECT).unwrap();
        let lines: Vec<String> = (0..20)
            .map(|i| {
                if i == 7 {
                    line("bad", "not-a-number")
                } else {
                    line(&format!("n{i}"), &i.to_string())
                }
            })
            .chain(std::iter::once("\"not telemetry\"".to_string()))
            .collect();
        std::fs::write(dir.path().join("in.jsonl"), lines.join("\n")).unwrap();

        let config = Config::load(dir.path()).unwrap();
        let summary = execute(&config, None).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                messages: 21,
                undecodable: 1,
                records: 19,
                errors: 1,
                warnings: 0,
            }
        );

        let written = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        let values: Vec<i64> = written
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["v"].as_i64().unwrap())
            .collect();
        let expected: Vec<i64> = (0..20).filter(|i| *i != 7).collect();
        assert_eq!(values, expected);
    }
}
