//! Streaming pod logs. The engine client demultiplexes the framed
//! stdout/stderr stream; frames are forwarded as raw bytes. Non-follow
//! reads run to EOF, follow streams block on new frames until the caller
//! drops the stream.

use crate::EngineAdapter;
use crate::convert::request::WorkloadKind;
use crate::error::{Error, Result};

use bollard::query_parameters::LogsOptionsBuilder;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

#[derive(Clone, Copy, Debug, Default)]
pub struct LogStreamOptions {
    pub follow: bool,
    pub timestamps: bool,
    pub tail_lines: Option<i64>,
}

impl EngineAdapter {
    pub async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        options: LogStreamOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        // resolve through the workload view so an unknown pod is a 404, not
        // an engine error surfaced mid-stream
        let snapshot = self
            .workload_snapshot(WorkloadKind::Pod, namespace, name)
            .await?;

        let tail = options
            .tail_lines
            .map(|lines| lines.to_string())
            .unwrap_or_else(|| "all".to_string());

        let stream = self.docker().logs(
            &snapshot.name,
            Some(
                LogsOptionsBuilder::default()
                    .follow(options.follow)
                    .stdout(true)
                    .stderr(true)
                    .timestamps(options.timestamps)
                    .tail(&tail)
                    .build(),
            ),
        );

        let container = snapshot.name;
        Ok(stream
            .map(move |frame| {
                frame.map(|output| output.into_bytes()).map_err(|e| {
                    Error::EngineError(format!("failed to read logs of {container}"), e)
                })
            })
            .boxed())
    }
}
