//! The packed index buffer a `DofObject` stores its per-system DOF layout in.
//!
//! The buffer is a flat sequence of `DofIdType` words:
//!
//! ```text
//! [ns, start_1, .., start_{ns-1}, <system 0 block>, .., <system ns-1 block>]
//! ```
//!
//! An empty buffer holds zero systems. Word 0 is the number of systems, which is also the
//! offset of system 0's block since the header is exactly `ns` words long. Word `s` is the
//! offset of system `s`'s block; each block runs up to the start of the next one (or the end
//! of the buffer for the last system). A system block is a run of two-word [`GroupRecord`]s:
//! the packed `ncv = (n_vars << 8) | n_comp` word followed by the group's DOF base, with
//! [`INVALID_ID`] standing in for an unset base.

use crate::types::{id_from_raw, id_to_raw, DofIdType, INVALID_ID};
use std::ops::Range;
use thiserror::Error;

/// Number of low bits of the `ncv` word holding the component count
pub const NCV_MAGIC_EXP: u32 = 8;

/// `n_vars` is stored in multiples of this value in the `ncv` word
pub const NCV_MAGIC: DofIdType = 1 << NCV_MAGIC_EXP;

/// Largest number of components per variable the `ncv` word can hold
pub const MAX_N_COMP: usize = (NCV_MAGIC - 1) as usize;

/// Largest number of variables per group the `ncv` word can hold
pub const MAX_N_VARS: usize = (DofIdType::MAX >> NCV_MAGIC_EXP) as usize;

/// Number of words per group record
pub const GROUP_RECORD_LEN: usize = 2;

/// Errors raised while decoding a packed buffer or an indexing message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackedBufferError {
    /// The header claims more systems than there are words in the buffer.
    #[error("header declares {n_systems} systems but the buffer has only {len} words")]
    HeaderTooLong { n_systems: DofIdType, len: usize },

    /// A buffer with data words declares zero systems.
    #[error("header declares zero systems but the buffer has {len} words")]
    ZeroSystemsWithData { len: usize },

    /// A system block starts before the previous one or past the end of the buffer.
    #[error("system {system} starts at word {start}, outside {min}..={max}")]
    SystemStartOutOfRange {
        system: usize,
        start: DofIdType,
        min: usize,
        max: usize,
    },

    /// A system block is not a whole number of group records.
    #[error("system {system} block has {len} words, not a whole number of group records")]
    PartialGroupRecord { system: usize, len: usize },

    /// An indexing message ended before all of its declared words.
    #[error("indexing message truncated: needed {needed} words, {available} available")]
    TruncatedMessage { needed: usize, available: usize },

    /// A group's DOFs would run past the last valid DOF index.
    #[error("system {system}, group {group}: DOF base {base} leaves no room for {n_dofs} DOFs")]
    BaseOverflow {
        system: usize,
        group: usize,
        base: DofIdType,
        n_dofs: DofIdType,
    },

    /// The leading old-object flag of an indexing message was neither 0 nor 1.
    #[error("invalid old DOF object flag {0} in indexing message")]
    InvalidOldObjectFlag(DofIdType),

    /// The old DOF object of an indexing message carries an old object of its own.
    #[error("old DOF object in indexing message has its own old DOF object")]
    NestedOldObject,
}

/// A decoded variable group: `n_vars` variables of `n_comp` components each, numbered
/// contiguously from `dof_base`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub n_vars: usize,
    pub n_comp: usize,
    pub dof_base: Option<DofIdType>,
}

impl GroupRecord {
    /// A group of `n_vars` scalar variables with no DOFs numbered yet
    pub fn new(n_vars: usize) -> Self {
        GroupRecord {
            n_vars,
            n_comp: 1,
            dof_base: None,
        }
    }

    /// Decode a group from its two words
    pub fn decode(words: [DofIdType; GROUP_RECORD_LEN]) -> Self {
        let [ncv, base] = words;
        GroupRecord {
            n_vars: (ncv >> NCV_MAGIC_EXP) as usize,
            n_comp: (ncv & (NCV_MAGIC - 1)) as usize,
            dof_base: id_from_raw(base),
        }
    }

    /// Encode the group into its two words
    pub fn encode(&self) -> [DofIdType; GROUP_RECORD_LEN] {
        assert!(
            self.n_vars <= MAX_N_VARS,
            "n_vars = {} cannot be packed (max {})",
            self.n_vars,
            MAX_N_VARS
        );
        assert!(
            self.n_comp <= MAX_N_COMP,
            "n_comp = {} cannot be packed (max {})",
            self.n_comp,
            MAX_N_COMP
        );
        let ncv = ((self.n_vars as DofIdType) << NCV_MAGIC_EXP) | self.n_comp as DofIdType;
        [ncv, id_to_raw(self.dof_base)]
    }

    /// Number of scalar DOFs in the whole group
    pub fn n_dofs(&self) -> usize {
        self.n_vars * self.n_comp
    }

    /// Number of scalar DOFs in the whole group, `None` if it overflows a `DofIdType`.
    /// Never `None` for a group within the `ncv` limits.
    pub fn checked_n_dofs(&self) -> Option<DofIdType> {
        (self.n_vars as DofIdType).checked_mul(self.n_comp as DofIdType)
    }

    /// Whether every DOF of the group, from its base on, is a valid DOF index.
    /// Unnumbered groups always fit.
    pub fn dofs_fit(&self) -> bool {
        match self.dof_base {
            None => true,
            // The last DOF, base + n_dofs - 1, must stay below INVALID_ID
            Some(base) => self
                .checked_n_dofs()
                .and_then(|n_dofs| base.checked_add(n_dofs))
                .is_some(),
        }
    }

    /// Global index of component `comp` of the `var_in_group`th variable of this group, or
    /// `INVALID_ID` if the group has not been numbered
    pub fn dof_number(&self, var_in_group: usize, comp: usize) -> DofIdType {
        debug_assert!(var_in_group < self.n_vars);
        debug_assert!(comp < self.n_comp);

        match self.dof_base {
            Some(base) => base + (var_in_group * self.n_comp + comp) as DofIdType,
            None => INVALID_ID,
        }
    }
}

/// The decoded header of a packed buffer: the word range of every system's block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferHeader {
    blocks: Vec<Range<usize>>,
}

impl BufferHeader {
    /// Parse and validate the header of `words`, including the shape of every system block
    pub fn parse(words: &[DofIdType]) -> Result<Self, PackedBufferError> {
        let len = words.len();
        if len == 0 {
            return Ok(BufferHeader { blocks: vec![] });
        }

        let n_systems = match usize::try_from(words[0]) {
            Ok(n) if n <= len => n,
            _ => {
                return Err(PackedBufferError::HeaderTooLong {
                    n_systems: words[0],
                    len,
                })
            }
        };
        if n_systems == 0 {
            return Err(PackedBufferError::ZeroSystemsWithData { len });
        }

        // Word 0 doubles as the start of system 0
        let mut starts = Vec::with_capacity(n_systems + 1);
        starts.push(n_systems);
        for (system, &raw) in words.iter().enumerate().take(n_systems).skip(1) {
            let min = starts[system - 1];
            match usize::try_from(raw) {
                Ok(start) if start >= min && start <= len => starts.push(start),
                _ => {
                    return Err(PackedBufferError::SystemStartOutOfRange {
                        system,
                        start: raw,
                        min,
                        max: len,
                    })
                }
            }
        }
        starts.push(len);

        let blocks: Vec<_> = starts.windows(2).map(|w| w[0]..w[1]).collect();
        for (system, block) in blocks.iter().enumerate() {
            if block.len() % GROUP_RECORD_LEN != 0 {
                return Err(PackedBufferError::PartialGroupRecord {
                    system,
                    len: block.len(),
                });
            }

            let records = words[block.clone()].chunks_exact(GROUP_RECORD_LEN);
            for (group, w) in records.enumerate() {
                let record = GroupRecord::decode([w[0], w[1]]);
                if let Some(base) = record.dof_base {
                    if !record.dofs_fit() {
                        return Err(PackedBufferError::BaseOverflow {
                            system,
                            group,
                            base,
                            n_dofs: record.n_vars as DofIdType * record.n_comp as DofIdType,
                        });
                    }
                }
            }
        }

        Ok(BufferHeader { blocks })
    }

    pub fn n_systems(&self) -> usize {
        self.blocks.len()
    }

    /// Word range of system `s`'s block
    pub fn block(&self, s: usize) -> Range<usize> {
        self.blocks[s].clone()
    }
}

/// Owned packed buffer with typed access to its systems and group records.
///
/// Every buffer held here is well formed: it is either built through the mutators below or
/// validated by [`IndexBuffer::from_words`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexBuffer {
    words: Vec<DofIdType>,
}

impl IndexBuffer {
    /// A buffer holding zero systems
    pub fn new() -> Self {
        IndexBuffer { words: vec![] }
    }

    /// Take ownership of `words` after checking they form a valid packed buffer
    pub fn from_words(words: Vec<DofIdType>) -> Result<Self, PackedBufferError> {
        BufferHeader::parse(&words)?;
        Ok(IndexBuffer { words })
    }

    /// Build a buffer from decoded group records, one slice per system
    pub fn from_groups<'a, I>(systems: I) -> Self
    where
        I: IntoIterator<Item = &'a [GroupRecord]>,
    {
        let systems: Vec<_> = systems.into_iter().collect();
        let mut buf = IndexBuffer::new();
        buf.resize_systems(systems.len());
        for (s, groups) in systems.into_iter().enumerate() {
            buf.set_groups(s, groups);
        }
        buf
    }

    /// The raw packed words
    pub fn words(&self) -> &[DofIdType] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn n_systems(&self) -> usize {
        self.words.first().map_or(0, |&ns| ns as usize)
    }

    fn block(&self, s: usize) -> Range<usize> {
        let n_systems = self.n_systems();
        assert!(
            s < n_systems,
            "system {} out of range for object with {} systems",
            s,
            n_systems
        );

        let start = self.words[s] as usize;
        let end = if s + 1 == n_systems {
            self.words.len()
        } else {
            self.words[s + 1] as usize
        };
        start..end
    }

    /// Number of variable groups in system `s`
    pub fn n_groups(&self, s: usize) -> usize {
        self.block(s).len() / GROUP_RECORD_LEN
    }

    fn record_offset(&self, s: usize, vg: usize) -> usize {
        let block = self.block(s);
        let n_groups = block.len() / GROUP_RECORD_LEN;
        assert!(
            vg < n_groups,
            "variable group {} out of range for system {} with {} groups",
            vg,
            s,
            n_groups
        );
        block.start + GROUP_RECORD_LEN * vg
    }

    /// Decoded record of group `vg` of system `s`
    pub fn group(&self, s: usize, vg: usize) -> GroupRecord {
        let offset = self.record_offset(s, vg);
        GroupRecord::decode([self.words[offset], self.words[offset + 1]])
    }

    /// Iterate over the decoded group records of system `s`
    pub fn groups(&self, s: usize) -> impl Iterator<Item = GroupRecord> + '_ {
        self.words[self.block(s)]
            .chunks_exact(GROUP_RECORD_LEN)
            .map(|w| GroupRecord::decode([w[0], w[1]]))
    }

    /// Overwrite group `vg` of system `s`
    pub fn set_group(&mut self, s: usize, vg: usize, record: GroupRecord) {
        assert!(
            record.dofs_fit(),
            "group {} of system {}: DOFs from base {:?} overflow the DOF index type",
            vg,
            s,
            record.dof_base
        );
        let offset = self.record_offset(s, vg);
        self.words[offset..offset + GROUP_RECORD_LEN].copy_from_slice(&record.encode());
    }

    /// Overwrite only the DOF base word of group `vg` of system `s`
    pub fn set_dof_base(&mut self, s: usize, vg: usize, base: Option<DofIdType>) {
        let record = GroupRecord {
            dof_base: base,
            ..self.group(s, vg)
        };
        assert!(
            record.dofs_fit(),
            "group {} of system {}: {:?} DOFs from base {:?} overflow the DOF index type",
            vg,
            s,
            record.checked_n_dofs(),
            base
        );

        let offset = self.record_offset(s, vg);
        self.words[offset + 1] = id_to_raw(base);
    }

    /// Replace the whole group list of system `s`, shifting the blocks of later systems
    pub fn set_groups(&mut self, s: usize, groups: &[GroupRecord]) {
        let block = self.block(s);
        let old_len = block.len();
        let new_len = GROUP_RECORD_LEN * groups.len();

        self.words
            .splice(block, groups.iter().flat_map(GroupRecord::encode));

        let n_systems = self.n_systems();
        for start in &mut self.words[s + 1..n_systems] {
            *start = *start + new_len as DofIdType - old_len as DofIdType;
        }
    }

    /// Change the number of systems to `n`.
    ///
    /// Systems below `min(old, n)` keep their groups; systems added by growing start empty.
    pub fn resize_systems(&mut self, n: usize) {
        let old = self.n_systems();
        if n == old {
            return;
        }

        let mut words = Vec::with_capacity(n + self.words.len().saturating_sub(old));
        words.resize(n, 0);
        for s in 0..old.min(n) {
            words[s] = words.len() as DofIdType;
            words.extend_from_slice(&self.words[self.block(s)]);
        }
        let len = words.len() as DofIdType;
        for start in words.iter_mut().take(n).skip(old.min(n)) {
            *start = len;
        }

        self.words = words;
    }

    /// Append one empty system
    pub fn push_system(&mut self) {
        self.resize_systems(self.n_systems() + 1);
    }

    /// Remove every system
    pub fn clear(&mut self) {
        self.words.clear();
    }
}
