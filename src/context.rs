//! Execution context: per-layer scratch memory and run-mode flags.
//!
//! Layers do not allocate inside `forward`/`backward`. Instead each layer
//! declares the scratch buffers it needs ([`ScratchSpec`]) and the context
//! materializes them in one [`ScratchArena`] per layer, rebuilt only when the
//! batch size or sequence length changes. Buffers are zero-filled when built;
//! sequence-scoped buffers (recurrent history and cell state) additionally
//! survive across calls until [`ExecutionContext::reset_state`] clears them.

use log::debug;

use crate::layers::Layer;
use crate::math::VectorOps;

/// Element type of a scratch buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferKind {
    /// `f32` work data.
    Float,
    /// `usize` records, e.g. max-pooling winner indices.
    Index,
}

/// How many slots a scratch buffer gets and how long they live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferScope {
    /// One slot per sample in the batch; contents are transient per call.
    PerSample,
    /// One slot per independent sequence (`samples / sequence_length`).
    /// Contents persist across calls until `reset_state`.
    PerSequence,
    /// A single slot shared by the whole batch.
    PerBatch,
}

/// One scratch buffer requirement declared by a layer.
#[derive(Clone, Copy, Debug)]
pub struct ScratchSpec {
    pub kind: BufferKind,
    pub scope: BufferScope,
    /// Elements per slot.
    pub len: usize,
}

impl ScratchSpec {
    pub fn float(scope: BufferScope, len: usize) -> Self {
        Self {
            kind: BufferKind::Float,
            scope,
            len,
        }
    }

    pub fn index(scope: BufferScope, len: usize) -> Self {
        Self {
            kind: BufferKind::Index,
            scope,
            len,
        }
    }
}

/// The materialized scratch buffers of one layer, addressed by the position
/// of the corresponding [`ScratchSpec`] in the layer's declaration.
pub struct ScratchArena {
    specs: Vec<ScratchSpec>,
    slot_counts: Vec<usize>,
    floats: Vec<Vec<f32>>,
    indices: Vec<Vec<usize>>,
}

impl ScratchArena {
    /// Build zero-filled buffers for `samples` samples grouped into sequences
    /// of `sequence_length`.
    pub fn build(specs: Vec<ScratchSpec>, samples: usize, sequence_length: usize) -> Self {
        assert!(samples > 0, "arena requires at least one sample");
        assert_eq!(
            samples % sequence_length,
            0,
            "sample count {} is not a multiple of sequence length {}",
            samples,
            sequence_length
        );

        let mut slot_counts = Vec::with_capacity(specs.len());
        let mut floats = Vec::with_capacity(specs.len());
        let mut indices = Vec::with_capacity(specs.len());

        for spec in &specs {
            let slots = match spec.scope {
                BufferScope::PerSample => samples,
                BufferScope::PerSequence => samples / sequence_length,
                BufferScope::PerBatch => 1,
            };
            slot_counts.push(slots);
            match spec.kind {
                BufferKind::Float => {
                    floats.push(vec![0.0; slots * spec.len]);
                    indices.push(Vec::new());
                }
                BufferKind::Index => {
                    floats.push(Vec::new());
                    indices.push(vec![0; slots * spec.len]);
                }
            }
        }

        Self {
            specs,
            slot_counts,
            floats,
            indices,
        }
    }

    /// Elements per slot of buffer `buf`.
    pub fn slot_len(&self, buf: usize) -> usize {
        self.specs[buf].len
    }

    /// Number of slots materialized for buffer `buf`.
    pub fn slots(&self, buf: usize) -> usize {
        self.slot_counts[buf]
    }

    pub fn float(&self, buf: usize, slot: usize) -> &[f32] {
        let len = self.specs[buf].len;
        &self.floats[buf][slot * len..(slot + 1) * len]
    }

    pub fn float_mut(&mut self, buf: usize, slot: usize) -> &mut [f32] {
        let len = self.specs[buf].len;
        &mut self.floats[buf][slot * len..(slot + 1) * len]
    }

    pub fn index(&self, buf: usize, slot: usize) -> &[usize] {
        let len = self.specs[buf].len;
        &self.indices[buf][slot * len..(slot + 1) * len]
    }

    pub fn index_mut(&mut self, buf: usize, slot: usize) -> &mut [usize] {
        let len = self.specs[buf].len;
        &mut self.indices[buf][slot * len..(slot + 1) * len]
    }

    /// Whole float buffer, for slicing into per-slot chunks in parallel loops.
    pub fn float_all(&self, buf: usize) -> &[f32] {
        debug_assert_eq!(self.specs[buf].kind, BufferKind::Float);
        &self.floats[buf]
    }

    /// Mutable variant of [`float_all`](Self::float_all).
    pub fn float_all_mut(&mut self, buf: usize) -> &mut [f32] {
        debug_assert_eq!(self.specs[buf].kind, BufferKind::Float);
        &mut self.floats[buf]
    }

    /// A float buffer and an index buffer borrowed simultaneously (they live
    /// in disjoint storage), e.g. pooling outputs plus winner records.
    pub fn float_and_index_mut(&mut self, fbuf: usize, ibuf: usize) -> (&mut [f32], &mut [usize]) {
        (&mut self.floats[fbuf], &mut self.indices[ibuf])
    }

    /// Whole index buffer.
    pub fn index_all(&self, buf: usize) -> &[usize] {
        debug_assert_eq!(self.specs[buf].kind, BufferKind::Index);
        &self.indices[buf]
    }

    /// Mutable variant of [`index_all`](Self::index_all).
    pub fn index_all_mut(&mut self, buf: usize) -> &mut [usize] {
        debug_assert_eq!(self.specs[buf].kind, BufferKind::Index);
        &mut self.indices[buf]
    }

    /// Several float buffers borrowed mutably at once. `ids` must be strictly
    /// ascending; recurrent layers use this to hold history, gate and carry
    /// buffers simultaneously.
    pub fn float_bufs_mut<const N: usize>(&mut self, ids: [usize; N]) -> [&mut [f32]; N] {
        debug_assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids must be ascending");

        let specs = &self.specs;
        let mut picked: Vec<&mut [f32]> = Vec::with_capacity(N);
        let mut want = ids.iter().copied().peekable();
        for (i, buffer) in self.floats.iter_mut().enumerate() {
            if want.peek() == Some(&i) {
                want.next();
                debug_assert_eq!(specs[i].kind, BufferKind::Float);
                picked.push(buffer.as_mut_slice());
            }
        }
        assert_eq!(picked.len(), N, "unknown scratch buffer id");
        match picked.try_into() {
            Ok(bufs) => bufs,
            Err(_) => unreachable!(),
        }
    }

    /// Zero every sequence-scoped buffer.
    pub fn reset_sequence_state(&mut self) {
        for (i, spec) in self.specs.iter().enumerate() {
            if spec.scope == BufferScope::PerSequence {
                match spec.kind {
                    BufferKind::Float => self.floats[i].fill(0.0),
                    BufferKind::Index => self.indices[i].fill(0),
                }
            }
        }
    }
}

/// Per-call view handed to a layer: batch geometry, run mode, the vector
/// primitives and the layer's own scratch arena.
pub struct LayerContext<'a> {
    pub samples: usize,
    pub training: bool,
    pub sequence_length: usize,
    pub math: VectorOps,
    pub scratch: &'a mut ScratchArena,
}

impl LayerContext<'_> {
    /// Independent sequences in the current batch.
    pub fn sequences(&self) -> usize {
        self.samples / self.sequence_length
    }
}

/// Owns the scratch arenas for every layer of a network plus the run-mode
/// flags, rebuilding arenas only when the batch geometry changes.
pub struct ExecutionContext {
    training: bool,
    sequence_length: usize,
    samples: usize,
    arenas: Vec<ScratchArena>,
}

impl ExecutionContext {
    pub fn new(training: bool) -> Self {
        Self {
            training,
            sequence_length: 1,
            samples: 0,
            arenas: Vec::new(),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Number of samples the arenas are currently sized for (0 before the
    /// first `prepare`).
    pub fn allocated_samples(&self) -> usize {
        self.samples
    }

    /// Set the recurrent unroll length. Forces an arena rebuild on the next
    /// `prepare` since sequence-scoped slot counts change with it.
    pub fn set_sequence_length(&mut self, sequence_length: usize) {
        assert!(sequence_length > 0, "sequence length must be positive");
        if self.sequence_length != sequence_length {
            self.sequence_length = sequence_length;
            self.samples = 0;
            self.arenas.clear();
        }
    }

    /// Ensure every layer's arena is sized for `samples`. No-op when the batch
    /// geometry is unchanged, so repeated equally-sized calls pay nothing.
    pub fn prepare(&mut self, layers: &[Box<dyn Layer>], samples: usize) {
        assert!(samples > 0, "batch must contain at least one sample");
        assert_eq!(
            samples % self.sequence_length,
            0,
            "sample count {} is not a multiple of sequence length {}",
            samples,
            self.sequence_length
        );
        if self.samples == samples && self.arenas.len() == layers.len() {
            return;
        }

        debug!(
            "building scratch arenas: {} layers, {} samples, sequence length {}",
            layers.len(),
            samples,
            self.sequence_length
        );
        self.arenas = layers
            .iter()
            .map(|layer| {
                ScratchArena::build(
                    layer.scratch_spec(self.training),
                    samples,
                    self.sequence_length,
                )
            })
            .collect();
        self.samples = samples;
    }

    /// Zero all sequence-scoped state so the next call starts a fresh
    /// sequence.
    pub fn reset_state(&mut self) {
        for arena in &mut self.arenas {
            arena.reset_sequence_state();
        }
    }

    pub fn arena_mut(&mut self, layer: usize) -> &mut ScratchArena {
        &mut self.arenas[layer]
    }
}
