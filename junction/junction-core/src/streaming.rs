//! Bounded-memory streaming joins: the right (build) side is drained and
//! indexed once, then left batches are probed as they arrive, one output
//! batch per probe chunk. Memory is bounded by the build side plus a
//! single probe chunk. Full joins emit one trailing batch of unmatched
//! right rows after the left stream ends.

use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use datafusion::arrow::array::{RecordBatch, UInt32Builder};
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::SchemaRef;
use futures::{ready, Stream, StreamExt};
use log::debug;

use crate::error::{config_err, internal_err, Result};
use crate::join::{
    append_unmatched_right, check_row_capacity, cross_indices, gather, probe_into, resolve,
    JoinHashIndex, JoinIndices, JoinKind, JoinSpec, KeyEncoder, ResolvedJoin, SideKeys,
};

pub type SendableBatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch>> + Send>>;

/// Starts a streaming join. The right stream is consumed entirely before
/// the first output batch; the left stream is consumed incrementally.
/// As-of joins need the whole ordered right partition per left row and
/// are not available here.
pub fn join_stream(
    left: SendableBatchStream,
    left_schema: SchemaRef,
    right: SendableBatchStream,
    right_schema: SchemaRef,
    spec: JoinSpec,
) -> Result<JoinStream> {
    if spec.kind == JoinKind::Asof {
        return config_err!("as-of joins are not supported in streaming mode");
    }
    let resolved = resolve(&left_schema, &right_schema, &spec)?;
    Ok(JoinStream {
        spec,
        resolved,
        left_schema,
        right_schema,
        left,
        right,
        state: StreamState::CollectRight(Vec::new()),
    })
}

/// Everything the probe phase needs, built once from the drained right
/// side. The key pieces are `None` for cross joins.
struct BuildSide {
    batch: RecordBatch,
    encoder: Option<KeyEncoder>,
    keys: Option<SideKeys>,
    index: Option<JoinHashIndex>,
    /// Rows probed so far across all left chunks, for the capacity check.
    probed_rows: usize,
}

enum StreamState {
    CollectRight(Vec<RecordBatch>),
    Probe(BuildSide),
    Done,
}

pub struct JoinStream {
    spec: JoinSpec,
    resolved: ResolvedJoin,
    left_schema: SchemaRef,
    right_schema: SchemaRef,
    left: SendableBatchStream,
    right: SendableBatchStream,
    state: StreamState,
}

impl JoinStream {
    /// Schema of every batch this stream emits.
    pub fn schema(&self) -> SchemaRef {
        self.resolved.output_schema.clone()
    }

    fn poll_next_impl(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<RecordBatch>>> {
        loop {
            match &mut self.state {
                StreamState::CollectRight(batches) => {
                    match ready!(self.right.poll_next_unpin(cx)) {
                        Some(Ok(batch)) => batches.push(batch),
                        Some(Err(e)) => {
                            self.state = StreamState::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                        None => {
                            let batches = mem::take(batches);
                            match build_side(&self.spec, &self.resolved, &self.right_schema, batches)
                            {
                                Ok(build) => self.state = StreamState::Probe(build),
                                Err(e) => {
                                    self.state = StreamState::Done;
                                    return Poll::Ready(Some(Err(e)));
                                }
                            }
                        }
                    }
                }
                StreamState::Probe(build) => match ready!(self.left.poll_next_unpin(cx)) {
                    Some(Ok(chunk)) => {
                        let result = probe_chunk(
                            &self.spec,
                            &self.resolved,
                            &self.left_schema,
                            build,
                            &chunk,
                        );
                        match result {
                            Ok(batch) if batch.num_rows() == 0 => continue,
                            Ok(batch) => return Poll::Ready(Some(Ok(batch))),
                            Err(e) => {
                                self.state = StreamState::Done;
                                return Poll::Ready(Some(Err(e)));
                            }
                        }
                    }
                    Some(Err(e)) => {
                        self.state = StreamState::Done;
                        return Poll::Ready(Some(Err(e)));
                    }
                    None => {
                        let epilogue = if self.spec.kind == JoinKind::Full {
                            Some(unmatched_right(&self.resolved, &self.left_schema, build))
                        } else {
                            None
                        };
                        self.state = StreamState::Done;
                        return match epilogue {
                            Some(Ok(batch)) if batch.num_rows() == 0 => Poll::Ready(None),
                            Some(Ok(batch)) => Poll::Ready(Some(Ok(batch))),
                            Some(Err(e)) => Poll::Ready(Some(Err(e))),
                            None => Poll::Ready(None),
                        };
                    }
                },
                StreamState::Done => return Poll::Ready(None),
            }
        }
    }
}

impl Stream for JoinStream {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_impl(cx)
    }
}

fn build_side(
    spec: &JoinSpec,
    resolved: &ResolvedJoin,
    right_schema: &SchemaRef,
    batches: Vec<RecordBatch>,
) -> Result<BuildSide> {
    let batch = concat_batches(right_schema, &batches)?;
    check_row_capacity(0, batch.num_rows())?;
    let (encoder, keys, index) = if spec.kind == JoinKind::Cross {
        (None, None, None)
    } else {
        let encoder = KeyEncoder::try_new(&resolved.common_types, false)?;
        let keys = encoder.encode(&batch, &resolved.right_keys)?;
        let index = JoinHashIndex::build(&keys.rows, &keys.valid);
        (Some(encoder), Some(keys), Some(index))
    };
    debug!(
        "streaming {} join: indexed {} build rows",
        spec.kind,
        batch.num_rows()
    );
    Ok(BuildSide {
        batch,
        encoder,
        keys,
        index,
        probed_rows: 0,
    })
}

fn probe_chunk(
    spec: &JoinSpec,
    resolved: &ResolvedJoin,
    left_schema: &SchemaRef,
    build: &mut BuildSide,
    chunk: &RecordBatch,
) -> Result<RecordBatch> {
    if chunk.schema().fields() != left_schema.fields() {
        return config_err!(
            "probe batch schema {} does not match the declared left schema {}",
            chunk.schema(),
            left_schema
        );
    }
    build.probed_rows += chunk.num_rows();
    check_row_capacity(build.probed_rows, 0)?;

    if spec.kind == JoinKind::Cross {
        let indices = cross_indices(chunk.num_rows(), build.batch.num_rows());
        return gather(resolved, chunk, &build.batch, None, &indices);
    }

    let (Some(encoder), Some(index), Some(build_keys)) =
        (&build.encoder, &mut build.index, &build.keys)
    else {
        return internal_err!("probe phase is missing its build-side key state");
    };
    let probe_keys = encoder.encode(chunk, &resolved.left_keys)?;

    let mut left_b = UInt32Builder::new();
    let mut right_b = UInt32Builder::new();
    probe_into(index, &probe_keys, spec.kind, &mut left_b, &mut right_b)?;
    let indices = JoinIndices {
        left: left_b.finish(),
        right: match spec.kind {
            JoinKind::Semi | JoinKind::Anti => None,
            _ => Some(right_b.finish()),
        },
    };
    gather(
        resolved,
        chunk,
        &build.batch,
        Some((&probe_keys.arrays, &build_keys.arrays)),
        &indices,
    )
}

/// The full-join epilogue: every build row no probe chunk touched, with
/// an all-null left side.
fn unmatched_right(
    resolved: &ResolvedJoin,
    left_schema: &SchemaRef,
    build: &BuildSide,
) -> Result<RecordBatch> {
    let (Some(encoder), Some(index), Some(build_keys)) =
        (&build.encoder, &build.index, &build.keys)
    else {
        return internal_err!("full-join epilogue is missing its build-side key state");
    };
    let mut left_b = UInt32Builder::new();
    let mut right_b = UInt32Builder::new();
    append_unmatched_right(index, &mut left_b, &mut right_b);
    let indices = JoinIndices {
        left: left_b.finish(),
        right: Some(right_b.finish()),
    };
    let empty_left = RecordBatch::new_empty(left_schema.clone());
    let empty_keys = encoder.encode(&empty_left, &resolved.left_keys)?;
    gather(
        resolved,
        &empty_left,
        &build.batch,
        Some((&empty_keys.arrays, &build_keys.arrays)),
        &indices,
    )
}
