use crate::packed::{GroupRecord, IndexBuffer, PackedBufferError, MAX_N_COMP};
use crate::types::*;
use std::fmt;
use tracing::debug;

/// Degree-of-freedom bookkeeping for one mesh entity (node, element, ...).
///
/// For each system the object holds an ordered list of variable groups. Every group owns
/// `n_vars` variables of `n_comp` components each, numbered contiguously from the group's DOF
/// base, so that the global index of component `comp` of variable `var` is
///
/// ```text
/// dof_base(group) + var_in_group * n_comp(group) + comp
/// ```
///
/// The layout lives in a single packed buffer (see [`crate::packed`]). Out-of-range system,
/// group, variable or component indices are bugs in the caller and panic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DofObject {
    id: Option<DofIdType>,
    processor_id: Option<ProcessorIdType>,
    idx_buf: IndexBuffer,
    old_dof_object: Option<Box<DofObject>>,
}

impl DofObject {
    /// Create an object with no id, no owner and zero systems
    pub fn new() -> Self {
        DofObject::default()
    }

    pub fn id(&self) -> DofIdType {
        id_to_raw(self.id)
    }

    pub fn set_id(&mut self, id: DofIdType) {
        self.id = id_from_raw(id);
    }

    pub fn valid_id(&self) -> bool {
        self.id.is_some()
    }

    pub fn invalidate_id(&mut self) {
        self.id = None;
    }

    pub fn processor_id(&self) -> ProcessorIdType {
        self.processor_id.unwrap_or(INVALID_PROCESSOR_ID)
    }

    pub fn set_processor_id(&mut self, pid: ProcessorIdType) {
        self.processor_id = if pid == INVALID_PROCESSOR_ID {
            None
        } else {
            Some(pid)
        };
    }

    pub fn valid_processor_id(&self) -> bool {
        self.processor_id.is_some()
    }

    pub fn invalidate_processor_id(&mut self) {
        self.processor_id = None;
    }

    /// Unset every DOF base, the id and the processor id
    pub fn invalidate(&mut self) {
        self.invalidate_dofs(None);
        self.invalidate_id();
        self.invalidate_processor_id();
    }

    pub fn n_systems(&self) -> usize {
        self.idx_buf.n_systems()
    }

    /// Resize to `n` systems. Systems that survive keep their groups, new ones have none.
    pub fn set_n_systems(&mut self, n: usize) {
        self.idx_buf.resize_systems(n);
    }

    /// Append one system with no variable groups
    pub fn add_system(&mut self) {
        self.idx_buf.push_system();
    }

    /// Remove all systems
    pub fn clear_dofs(&mut self) {
        self.idx_buf.clear();
    }

    /// Replace the groups of system `s` with one scalar group per entry of `n_vars_per_group`.
    /// None of the new groups are numbered.
    pub fn set_n_vars_per_group(&mut self, s: usize, n_vars_per_group: &[usize]) {
        let groups: Vec<_> = n_vars_per_group
            .iter()
            .map(|&n_vars| GroupRecord::new(n_vars))
            .collect();
        self.idx_buf.set_groups(s, &groups);
    }

    pub fn n_var_groups(&self, s: usize) -> usize {
        self.idx_buf.n_groups(s)
    }

    /// Total number of variables in system `s`
    pub fn n_vars(&self, s: usize) -> usize {
        self.idx_buf.groups(s).map(|g| g.n_vars).sum()
    }

    /// Number of variables in group `vg` of system `s`
    pub fn n_vars_group(&self, s: usize, vg: usize) -> usize {
        self.idx_buf.group(s, vg).n_vars
    }

    pub fn n_comp_group(&self, s: usize, vg: usize) -> usize {
        self.idx_buf.group(s, vg).n_comp
    }

    /// Number of components of variable `var` in system `s`
    pub fn n_comp(&self, s: usize, var: usize) -> usize {
        self.n_comp_group(s, self.var_to_vg(s, var))
    }

    /// Set the number of components of every variable in group `vg` of system `s`.
    ///
    /// The group's DOF base is unset, since the old one no longer addresses a block of the
    /// right size.
    pub fn set_n_comp_group(&mut self, s: usize, vg: usize, n_comp: usize) {
        assert!(
            n_comp <= MAX_N_COMP,
            "n_comp = {} exceeds the maximum of {} components per variable",
            n_comp,
            MAX_N_COMP
        );

        let mut group = self.idx_buf.group(s, vg);
        group.n_comp = n_comp;
        group.dof_base = None;
        self.idx_buf.set_group(s, vg, group);
    }

    /// Set the number of components of the group owning variable `var`
    pub fn set_n_comp(&mut self, s: usize, var: usize, n_comp: usize) {
        let vg = self.var_to_vg(s, var);
        self.set_n_comp_group(s, vg, n_comp);
    }

    /// Number of DOFs of variable `var` in system `s`
    pub fn n_dofs(&self, s: usize, var: usize) -> usize {
        self.n_comp(s, var)
    }

    /// Number of DOFs of all variables in system `s`
    pub fn n_dofs_system(&self, s: usize) -> usize {
        self.idx_buf.groups(s).map(|g| g.n_dofs()).sum()
    }

    /// Whether any variable of system `s` has at least one component
    pub fn has_dofs(&self, s: usize) -> bool {
        self.idx_buf.groups(s).any(|g| g.n_dofs() > 0)
    }

    pub fn has_any_dofs(&self) -> bool {
        (0..self.n_systems()).any(|s| self.has_dofs(s))
    }

    /// DOF base of group `vg` of system `s`, `INVALID_ID` if not numbered
    pub fn vg_dof_base(&self, s: usize, vg: usize) -> DofIdType {
        id_to_raw(self.idx_buf.group(s, vg).dof_base)
    }

    /// Panics if the group's DOFs would run past `INVALID_ID` from `base`
    pub fn set_vg_dof_base(&mut self, s: usize, vg: usize, base: DofIdType) {
        self.idx_buf.set_dof_base(s, vg, id_from_raw(base));
    }

    /// Unset the DOF bases of system `s`, or of every system if `s` is `None`
    pub fn invalidate_dofs(&mut self, s: Option<usize>) {
        let systems = match s {
            Some(s) => s..s + 1,
            None => 0..self.n_systems(),
        };
        for s in systems {
            for vg in 0..self.n_var_groups(s) {
                self.idx_buf.set_dof_base(s, vg, None);
            }
        }
    }

    /// Group of system `s` owning variable `var`
    pub fn var_to_vg(&self, s: usize, var: usize) -> usize {
        self.var_to_vg_and_offset(s, var).0
    }

    /// Group of system `s` owning variable `var`, and the index of `var` within that group
    pub fn var_to_vg_and_offset(&self, s: usize, var: usize) -> (usize, usize) {
        let mut offset = 0;
        for (vg, group) in self.idx_buf.groups(s).enumerate() {
            if var < offset + group.n_vars {
                return (vg, var - offset);
            }
            offset += group.n_vars;
        }
        panic!(
            "variable {} out of range for system {} with {} variables",
            var, s, offset
        );
    }

    /// Global DOF index of component `comp` of variable `var` in system `s`, or `INVALID_ID`
    /// if the owning group has not been numbered
    pub fn dof_number(&self, s: usize, var: usize, comp: usize) -> DofIdType {
        let (vg, var_in_group) = self.var_to_vg_and_offset(s, var);
        let group = self.idx_buf.group(s, vg);
        assert!(
            comp < group.n_comp,
            "component {} out of range for variable {} with {} components",
            comp,
            var,
            group.n_comp
        );

        group.dof_number(var_in_group, comp)
    }

    /// Global DOF indices of every component of variable `var` in system `s`
    pub fn dof_indices(&self, s: usize, var: usize) -> Vec<DofIdType> {
        (0..self.n_comp(s, var))
            .map(|comp| self.dof_number(s, var, comp))
            .collect()
    }

    /// Record `dn` as the DOF index of component `comp` of variable `var`.
    ///
    /// Only the first component of the first variable of a group is stored; every other DOF
    /// index is implied by the group's base and must agree with it.
    pub fn set_dof_number(&mut self, s: usize, var: usize, comp: usize, dn: DofIdType) {
        let (vg, var_in_group) = self.var_to_vg_and_offset(s, var);
        let group = self.idx_buf.group(s, vg);
        assert!(
            comp < group.n_comp,
            "component {} out of range for variable {} with {} components",
            comp,
            var,
            group.n_comp
        );

        if var_in_group == 0 && comp == 0 {
            self.idx_buf.set_dof_base(s, vg, id_from_raw(dn));
        } else {
            assert_eq!(
                dn,
                group.dof_number(var_in_group, comp),
                "DOF {} of variable {} is not contiguous with its group base",
                comp,
                var
            );
        }
    }

    /// The packed representation of this object's DOF layout
    pub fn buffer(&self) -> &[DofIdType] {
        self.idx_buf.words()
    }

    /// Replace the whole DOF layout with the packed buffer `buf`.
    ///
    /// On error the object is left unchanged.
    pub fn set_buffer(&mut self, buf: Vec<DofIdType>) -> Result<(), PackedBufferError> {
        self.idx_buf = IndexBuffer::from_words(buf)?;
        debug!(
            n_systems = self.n_systems(),
            len = self.idx_buf.len(),
            "decoded DOF object buffer"
        );
        Ok(())
    }

    /// Log the raw packed buffer
    pub fn debug_buffer(&self) {
        debug!(id = ?self.id, buffer = ?self.idx_buf.words(), "DOF object buffer");
    }

    /// Keep a copy of the current DOF layout so it can be consulted after renumbering
    pub fn set_old_dof_object(&mut self) {
        self.old_dof_object = None;
        let mut old = self.clone();
        old.old_dof_object = None;
        self.old_dof_object = Some(Box::new(old));
    }

    pub fn old_dof_object(&self) -> Option<&DofObject> {
        self.old_dof_object.as_deref()
    }

    pub fn clear_old_dof_object(&mut self) {
        self.old_dof_object = None;
    }

    /// Number of words [`DofObject::pack_indexing`] appends
    pub fn packed_indexing_size(&self) -> usize {
        2 + self.idx_buf.len()
            + self
                .old_dof_object
                .as_ref()
                .map_or(0, |old| old.packed_indexing_size())
    }

    /// Append the indexing message `[has_old, len, buffer.., old message..]` to `target`
    pub fn pack_indexing(&self, target: &mut Vec<DofIdType>) {
        target.reserve(self.packed_indexing_size());
        target.push(self.old_dof_object.is_some() as DofIdType);
        target.push(self.idx_buf.len() as DofIdType);
        target.extend_from_slice(self.idx_buf.words());
        if let Some(old) = &self.old_dof_object {
            old.pack_indexing(target);
        }
    }

    /// Restore the DOF layout (and old DOF object, if any) from an indexing message written by
    /// [`DofObject::pack_indexing`]. Returns the number of words consumed.
    ///
    /// An old DOF object never carries an old object of its own, so a message nesting them
    /// is rejected.
    pub fn unpack_indexing(&mut self, message: &[DofIdType]) -> Result<usize, PackedBufferError> {
        let (has_old, idx_buf, mut consumed) = unpack_indexing_level(message)?;

        let old_dof_object = if has_old {
            let (old_has_old, old_buf, old_consumed) = unpack_indexing_level(&message[consumed..])?;
            if old_has_old {
                return Err(PackedBufferError::NestedOldObject);
            }
            consumed += old_consumed;
            Some(Box::new(DofObject {
                idx_buf: old_buf,
                ..DofObject::default()
            }))
        } else {
            None
        };

        self.idx_buf = idx_buf;
        self.old_dof_object = old_dof_object;
        Ok(consumed)
    }
}

/// Decode one `[has_old, len, buffer..]` level of an indexing message
fn unpack_indexing_level(
    message: &[DofIdType],
) -> Result<(bool, IndexBuffer, usize), PackedBufferError> {
    let truncated = |needed| PackedBufferError::TruncatedMessage {
        needed,
        available: message.len(),
    };

    let (has_old, len) = match message {
        [has_old, len, ..] => (*has_old, *len),
        _ => return Err(truncated(2)),
    };
    let has_old = match has_old {
        0 => false,
        1 => true,
        flag => return Err(PackedBufferError::InvalidOldObjectFlag(flag)),
    };

    let end = usize::try_from(len)
        .ok()
        .and_then(|len| len.checked_add(2))
        .filter(|&end| end <= message.len())
        .ok_or_else(|| truncated(len.saturating_add(2) as usize))?;
    let idx_buf = IndexBuffer::from_words(message[2..end].to_vec())?;

    Ok((has_old, idx_buf, end))
}

impl fmt::Display for DofObject {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "DofObject {}", id)?,
            None => write!(f, "DofObject (no id)")?,
        }
        match self.processor_id {
            Some(pid) => write!(f, " [processor {}]", pid)?,
            None => write!(f, " [no processor]")?,
        }
        writeln!(f, " n_systems={}", self.n_systems())?;

        for s in 0..self.n_systems() {
            writeln!(
                f,
                "  system {}: n_vars={} n_var_groups={}",
                s,
                self.n_vars(s),
                self.n_var_groups(s)
            )?;
            for var in 0..self.n_vars(s) {
                write!(f, "    var {}: n_comp={} dofs:", var, self.n_comp(s, var))?;
                for dof in self.dof_indices(s, var) {
                    match id_from_raw(dof) {
                        Some(dof) => write!(f, " {}", dof)?,
                        None => write!(f, " -")?,
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packed::GROUP_RECORD_LEN;
    use proptest::prelude::*;

    const RANK: ProcessorIdType = 3;

    fn two_system_object() -> DofObject {
        let mut obj = DofObject::new();
        obj.set_n_systems(2);

        obj.set_n_vars_per_group(0, &[2, 3]);
        obj.set_n_vars_per_group(1, &[2, 3]);

        obj.set_n_comp_group(0, 0, 1);
        obj.set_n_comp_group(0, 1, 3);
        obj.set_n_comp_group(1, 0, 2);
        obj.set_n_comp_group(1, 1, 1);

        obj.set_vg_dof_base(0, 0, 0);
        obj.set_vg_dof_base(0, 1, 120);
        obj.set_vg_dof_base(1, 0, 20);
        obj.set_vg_dof_base(1, 1, 220);
        obj
    }

    #[test]
    fn valid_id() {
        let mut obj = DofObject::new();
        assert!(!obj.valid_id());

        obj.set_id(1);
        assert!(obj.valid_id());

        obj.set_id(INVALID_ID);
        assert!(!obj.valid_id());
        assert_eq!(obj.id(), INVALID_ID);
    }

    #[test]
    fn invalidate_id() {
        let mut obj = DofObject::new();
        obj.set_id(1);
        obj.invalidate_id();
        assert!(!obj.valid_id());
    }

    #[test]
    fn set_processor_id() {
        let mut obj = DofObject::new();
        obj.set_processor_id(RANK);
        assert_eq!(obj.processor_id(), RANK);
    }

    #[test]
    fn valid_processor_id() {
        let mut obj = DofObject::new();
        obj.set_processor_id(RANK);
        assert!(obj.valid_processor_id());

        obj.set_processor_id(INVALID_PROCESSOR_ID);
        assert!(!obj.valid_processor_id());
    }

    #[test]
    fn invalidate_processor_id() {
        let mut obj = DofObject::new();
        obj.set_processor_id(RANK);
        obj.invalidate_processor_id();
        assert!(!obj.valid_processor_id());
        assert_eq!(obj.processor_id(), INVALID_PROCESSOR_ID);
    }

    #[test]
    fn set_n_systems() {
        let mut obj = DofObject::new();
        assert_eq!(obj.n_systems(), 0);
        obj.set_n_systems(10);
        assert_eq!(obj.n_systems(), 10);
        obj.add_system();
        assert_eq!(obj.n_systems(), 11);
        obj.clear_dofs();
        assert_eq!(obj.n_systems(), 0);
    }

    #[test]
    fn set_n_variable_groups() {
        let mut obj = DofObject::new();
        obj.set_n_systems(2);

        let nvpg = [10, 20, 30];
        obj.set_n_vars_per_group(0, &nvpg);
        obj.set_n_vars_per_group(1, &nvpg);

        for s in 0..2 {
            assert_eq!(obj.n_vars(s), 60);
            assert_eq!(obj.n_var_groups(s), 3);
            for vg in 0..3 {
                assert_eq!(obj.n_vars_group(s, vg), nvpg[vg]);
                assert_eq!(obj.n_comp_group(s, vg), 1);
            }
        }
    }

    #[test]
    fn manual_dof_calculation() {
        let obj = two_system_object();

        assert_eq!(obj.dof_number(0, 0, 0), 0);
        assert_eq!(obj.dof_number(0, 1, 0), obj.vg_dof_base(0, 0) + 1 * 1 + 0);
        assert_eq!(obj.dof_number(0, 4, 2), obj.vg_dof_base(0, 1) + 2 * 3 + 2);
        assert_eq!(obj.dof_number(0, 4, 2), 128);
        assert_eq!(obj.dof_number(1, 2, 0), obj.vg_dof_base(1, 1) + 0 * 3 + 0);
        assert_eq!(obj.dof_number(1, 2, 0), 220);
        assert_eq!(obj.dof_number(1, 1, 1), 23);
    }

    #[test]
    fn vector_group_before_scalar_group() {
        let mut obj = DofObject::new();
        obj.set_n_systems(1);
        obj.set_n_vars_per_group(0, &[2, 2]);
        obj.set_n_comp_group(0, 0, 3);
        obj.set_vg_dof_base(0, 0, 10);
        obj.set_vg_dof_base(0, 1, 16);

        assert_eq!(obj.dof_indices(0, 0), vec![10, 11, 12]);
        assert_eq!(obj.dof_indices(0, 1), vec![13, 14, 15]);
        assert_eq!(obj.dof_indices(0, 2), vec![16]);
        assert_eq!(obj.dof_indices(0, 3), vec![17]);
        assert_eq!(obj.n_dofs_system(0), 8);
    }

    #[test]
    fn var_to_vg() {
        let obj = two_system_object();
        assert_eq!(obj.var_to_vg_and_offset(0, 0), (0, 0));
        assert_eq!(obj.var_to_vg_and_offset(0, 1), (0, 1));
        assert_eq!(obj.var_to_vg_and_offset(0, 2), (1, 0));
        assert_eq!(obj.var_to_vg_and_offset(0, 4), (1, 2));
        assert_eq!(obj.n_comp(0, 3), 3);
        assert_eq!(obj.n_dofs(1, 0), 2);
    }

    #[test]
    #[should_panic]
    fn var_out_of_range() {
        two_system_object().dof_number(0, 5, 0);
    }

    #[test]
    #[should_panic]
    fn comp_out_of_range() {
        two_system_object().dof_number(0, 0, 1);
    }

    #[test]
    #[should_panic]
    fn system_out_of_range() {
        two_system_object().n_vars(2);
    }

    #[test]
    fn unnumbered_groups_give_invalid_dofs() {
        let mut obj = DofObject::new();
        obj.set_n_systems(1);
        obj.set_n_vars_per_group(0, &[1]);
        assert_eq!(obj.dof_number(0, 0, 0), INVALID_ID);
        assert_eq!(obj.vg_dof_base(0, 0), INVALID_ID);

        obj.set_vg_dof_base(0, 0, 7);
        obj.set_n_comp_group(0, 0, 2);
        assert_eq!(obj.n_vars_group(0, 0), 1);
        assert_eq!(obj.dof_number(0, 0, 1), INVALID_ID);
    }

    #[test]
    fn set_dof_number_sets_group_base() {
        let mut obj = two_system_object();
        obj.set_dof_number(0, 2, 0, 300);
        assert_eq!(obj.vg_dof_base(0, 1), 300);
        assert_eq!(obj.dof_number(0, 3, 1), 304);

        // Implied DOFs may be set again as long as they agree
        obj.set_dof_number(0, 3, 1, 304);
    }

    #[test]
    #[should_panic]
    fn set_dof_number_rejects_non_contiguous() {
        let mut obj = two_system_object();
        obj.set_dof_number(0, 3, 1, 999);
    }

    #[test]
    fn has_dofs() {
        let mut obj = DofObject::new();
        obj.set_n_systems(2);
        obj.set_n_vars_per_group(0, &[2]);
        obj.set_n_comp_group(0, 0, 0);
        assert!(!obj.has_dofs(0));
        assert!(!obj.has_dofs(1));
        assert!(!obj.has_any_dofs());

        obj.set_n_vars_per_group(1, &[1]);
        assert!(obj.has_dofs(1));
        assert!(obj.has_any_dofs());
    }

    #[test]
    fn invalidate_dofs() {
        let mut obj = two_system_object();
        obj.invalidate_dofs(Some(1));
        assert_eq!(obj.vg_dof_base(0, 1), 120);
        assert_eq!(obj.vg_dof_base(1, 0), INVALID_ID);
        assert_eq!(obj.vg_dof_base(1, 1), INVALID_ID);

        obj.set_id(4);
        obj.set_processor_id(RANK);
        obj.invalidate();
        assert_eq!(obj.vg_dof_base(0, 0), INVALID_ID);
        assert!(!obj.valid_id());
        assert!(!obj.valid_processor_id());
        assert_eq!(obj.n_vars(0), 5);
    }

    #[test]
    fn shrink_and_regrow_systems() {
        let mut obj = two_system_object();
        obj.set_n_systems(1);
        obj.set_n_systems(2);

        assert_eq!(obj.n_var_groups(0), 2);
        assert_eq!(obj.dof_number(0, 4, 2), 128);
        assert_eq!(obj.n_var_groups(1), 0);
        assert_eq!(obj.n_vars(1), 0);
    }

    #[test]
    fn regrouping_shifts_later_systems() {
        let mut obj = two_system_object();
        obj.set_n_vars_per_group(0, &[1, 1, 1]);
        assert_eq!(obj.n_var_groups(0), 3);
        assert_eq!(obj.dof_number(1, 1, 1), 23);
        assert_eq!(obj.dof_number(1, 3, 0), 221);
    }

    #[test]
    fn set_buffer_fixtures() {
        let mut obj = DofObject::new();

        let buf0 = vec![2, 8, 257, 0, 257, 96, 257, 192, 257, 0];
        obj.set_buffer(buf0.clone()).unwrap();
        assert_eq!(obj.dof_number(0, 0, 0), 0);
        assert_eq!(obj.dof_number(0, 1, 0), 96);
        assert_eq!(obj.dof_number(0, 2, 0), 192);
        assert_eq!(obj.dof_number(1, 0, 0), 0);
        assert_eq!(obj.buffer(), buf0.as_slice());

        let buf1 = vec![2, 8, 257, 1, 257, 97, 257, 193, 257, 1];
        obj.set_buffer(buf1.clone()).unwrap();
        assert_eq!(obj.dof_number(0, 0, 0), 1);
        assert_eq!(obj.dof_number(0, 1, 0), 97);
        assert_eq!(obj.dof_number(0, 2, 0), 193);
        assert_eq!(obj.dof_number(1, 0, 0), 1);
        assert_eq!(obj.buffer(), buf1.as_slice());
    }

    #[test]
    fn set_buffer_rejects_malformed_and_keeps_state() {
        let mut obj = two_system_object();
        let before = obj.buffer().to_vec();

        let err = obj.set_buffer(vec![2, 9, 257, 0, 257, 96, 257, 192, 257, 0]);
        assert_eq!(
            err,
            Err(PackedBufferError::PartialGroupRecord { system: 0, len: 7 })
        );
        assert_eq!(obj.buffer(), before.as_slice());
    }

    #[test]
    fn buffer_round_trip_through_new_object() {
        let obj = two_system_object();
        let mut copy = DofObject::new();
        copy.set_buffer(obj.buffer().to_vec()).unwrap();

        for s in 0..2 {
            for var in 0..copy.n_vars(s) {
                for comp in 0..copy.n_comp(s, var) {
                    assert_eq!(copy.dof_number(s, var, comp), obj.dof_number(s, var, comp));
                }
            }
        }
    }

    #[test]
    fn old_dof_object() {
        let mut obj = two_system_object();
        obj.set_old_dof_object();
        obj.set_vg_dof_base(0, 1, 500);

        let old = obj.old_dof_object().unwrap();
        assert_eq!(old.vg_dof_base(0, 1), 120);
        assert!(old.old_dof_object().is_none());

        obj.clear_old_dof_object();
        assert!(obj.old_dof_object().is_none());
    }

    #[test]
    fn indexing_message() {
        let mut obj = two_system_object();
        obj.set_old_dof_object();
        obj.invalidate_dofs(None);

        let mut message = vec![];
        obj.pack_indexing(&mut message);
        assert_eq!(message.len(), obj.packed_indexing_size());
        assert_eq!(message[0], 1);

        let mut received = DofObject::new();
        assert_eq!(received.unpack_indexing(&message), Ok(message.len()));
        assert_eq!(received.buffer(), obj.buffer());
        assert_eq!(received.old_dof_object().unwrap().dof_number(0, 4, 2), 128);
    }

    #[test]
    fn truncated_indexing_message() {
        let obj = two_system_object();
        let mut message = vec![];
        obj.pack_indexing(&mut message);
        message.pop();

        let mut received = DofObject::new();
        assert!(matches!(
            received.unpack_indexing(&message),
            Err(PackedBufferError::TruncatedMessage { .. })
        ));
        assert_eq!(
            received.unpack_indexing(&[7, 0]),
            Err(PackedBufferError::InvalidOldObjectFlag(7))
        );
    }

    #[test]
    fn nested_old_object_in_message() {
        let mut received = two_system_object();
        let before = received.buffer().to_vec();

        assert_eq!(
            received.unpack_indexing(&[1, 0, 1, 0, 0, 0]),
            Err(PackedBufferError::NestedOldObject)
        );
        assert_eq!(received.buffer(), before.as_slice());
        assert!(received.old_dof_object().is_none());

        // Arbitrarily deep nesting is rejected at the second level
        let mut deep: Vec<DofIdType> = [1, 0].repeat(100_000);
        deep.extend_from_slice(&[0, 0]);
        assert_eq!(
            received.unpack_indexing(&deep),
            Err(PackedBufferError::NestedOldObject)
        );
    }

    #[test]
    fn set_buffer_rejects_overflowing_base() {
        let mut obj = DofObject::new();
        assert_eq!(
            obj.set_buffer(vec![1, 3 * 256 + 1, INVALID_ID - 1]),
            Err(PackedBufferError::BaseOverflow {
                system: 0,
                group: 0,
                base: INVALID_ID - 1,
                n_dofs: 3
            })
        );
        assert_eq!(obj.n_systems(), 0);

        obj.set_buffer(vec![1, 3 * 256 + 1, INVALID_ID - 3]).unwrap();
        assert_eq!(obj.dof_number(0, 2, 0), INVALID_ID - 1);
    }

    #[test]
    #[should_panic]
    fn set_vg_dof_base_rejects_overflow() {
        let mut obj = DofObject::new();
        obj.set_n_systems(1);
        obj.set_n_vars_per_group(0, &[3]);
        obj.set_vg_dof_base(0, 0, INVALID_ID - 1);
    }

    #[test]
    fn display_lists_dofs() {
        let mut obj = DofObject::new();
        obj.set_id(12);
        obj.set_n_systems(1);
        obj.set_n_vars_per_group(0, &[1, 1]);
        obj.set_n_comp_group(0, 0, 2);
        obj.set_vg_dof_base(0, 0, 4);

        let text = obj.to_string();
        assert!(text.starts_with("DofObject 12 [no processor] n_systems=1"));
        assert!(text.contains("var 0: n_comp=2 dofs: 4 5"));
        assert!(text.contains("var 1: n_comp=1 dofs: -"));
    }

    #[derive(Clone, Debug)]
    enum Mutation {
        SetId(DofIdType),
        InvalidateId,
        SetProcessorId(ProcessorIdType),
        InvalidateProcessorId,
        SetNSystems(usize),
        SetNVarsPerGroup(usize, Vec<usize>),
        SetNCompGroup(usize, usize, usize),
        SetVgDofBase(usize, usize, DofIdType),
        InvalidateDofs,
    }

    fn arb_mutation() -> impl Strategy<Value = Mutation> {
        prop_oneof![
            any::<DofIdType>().prop_map(Mutation::SetId),
            Just(Mutation::InvalidateId),
            any::<ProcessorIdType>().prop_map(Mutation::SetProcessorId),
            Just(Mutation::InvalidateProcessorId),
            (0usize..4).prop_map(Mutation::SetNSystems),
            (any::<usize>(), prop::collection::vec(0usize..4, 0..4))
                .prop_map(|(s, n_vars)| Mutation::SetNVarsPerGroup(s, n_vars)),
            (any::<usize>(), any::<usize>(), 0usize..4)
                .prop_map(|(s, vg, n_comp)| Mutation::SetNCompGroup(s, vg, n_comp)),
            (any::<usize>(), any::<usize>(), 0 as DofIdType..1000)
                .prop_map(|(s, vg, base)| Mutation::SetVgDofBase(s, vg, base)),
            Just(Mutation::InvalidateDofs),
        ]
    }

    /// Map arbitrary indices onto an existing group, if there is one
    fn pick_group(obj: &DofObject, s: usize, vg: usize) -> Option<(usize, usize)> {
        if obj.n_systems() == 0 {
            return None;
        }
        let s = s % obj.n_systems();
        match obj.n_var_groups(s) {
            0 => None,
            n => Some((s, vg % n)),
        }
    }

    fn mutate(obj: &mut DofObject, mutation: &Mutation) {
        match mutation {
            Mutation::SetId(id) => obj.set_id(*id),
            Mutation::InvalidateId => obj.invalidate_id(),
            Mutation::SetProcessorId(pid) => obj.set_processor_id(*pid),
            Mutation::InvalidateProcessorId => obj.invalidate_processor_id(),
            Mutation::SetNSystems(n) => obj.set_n_systems(*n),
            Mutation::SetNVarsPerGroup(s, n_vars) => {
                if obj.n_systems() > 0 {
                    obj.set_n_vars_per_group(s % obj.n_systems(), n_vars);
                }
            }
            Mutation::SetNCompGroup(s, vg, n_comp) => {
                if let Some((s, vg)) = pick_group(obj, *s, *vg) {
                    obj.set_n_comp_group(s, vg, *n_comp);
                }
            }
            Mutation::SetVgDofBase(s, vg, base) => {
                if let Some((s, vg)) = pick_group(obj, *s, *vg) {
                    obj.set_vg_dof_base(s, vg, *base);
                }
            }
            Mutation::InvalidateDofs => obj.invalidate_dofs(None),
        }
    }

    /// Every accessor value of `obj`, flattened
    fn accessor_values(obj: &DofObject) -> Vec<DofIdType> {
        let mut values = vec![
            obj.id(),
            obj.valid_id() as DofIdType,
            obj.processor_id() as DofIdType,
            obj.valid_processor_id() as DofIdType,
            obj.n_systems() as DofIdType,
        ];
        for s in 0..obj.n_systems() {
            values.push(obj.n_vars(s) as DofIdType);
            values.push(obj.n_var_groups(s) as DofIdType);
            values.push(obj.has_dofs(s) as DofIdType);
            for vg in 0..obj.n_var_groups(s) {
                values.push(obj.n_vars_group(s, vg) as DofIdType);
                values.push(obj.n_comp_group(s, vg) as DofIdType);
                values.push(obj.vg_dof_base(s, vg));
            }
            for var in 0..obj.n_vars(s) {
                values.extend(obj.dof_indices(s, var));
            }
        }
        values.extend_from_slice(obj.buffer());
        values
    }

    proptest! {
        #[test]
        fn id_accessors(
            id in prop_oneof![Just(INVALID_ID), Just(0 as DofIdType), any::<DofIdType>()]
        ) {
            let mut obj = DofObject::new();
            obj.set_id(id);
            prop_assert_eq!(obj.id(), id);
            prop_assert_eq!(obj.valid_id(), id != INVALID_ID);

            obj.invalidate_id();
            prop_assert!(!obj.valid_id());
            prop_assert_eq!(obj.id(), INVALID_ID);
        }

        #[test]
        fn processor_id_accessors(
            pid in prop_oneof![
                Just(INVALID_PROCESSOR_ID),
                Just(0 as ProcessorIdType),
                any::<ProcessorIdType>()
            ]
        ) {
            let mut obj = DofObject::new();
            obj.set_processor_id(pid);
            prop_assert_eq!(obj.processor_id(), pid);
            prop_assert_eq!(obj.valid_processor_id(), pid != INVALID_PROCESSOR_ID);

            obj.invalidate_processor_id();
            prop_assert!(!obj.valid_processor_id());
            prop_assert_eq!(obj.processor_id(), INVALID_PROCESSOR_ID);
        }

        #[test]
        fn accessors_stable_between_mutations(
            mutations in prop::collection::vec(arb_mutation(), 1..20)
        ) {
            let mut obj = DofObject::new();
            for mutation in &mutations {
                mutate(&mut obj, mutation);
                let first = accessor_values(&obj);
                let second = accessor_values(&obj);
                prop_assert_eq!(first, second, "after {:?}", mutation);
            }
        }

        #[test]
        fn dof_number_matches_group_formula(
            groups in prop::collection::vec((1usize..6, 1usize..5, 0u64..10_000), 1..6)
        ) {
            let mut obj = DofObject::new();
            obj.set_n_systems(1);
            let n_vars: Vec<_> = groups.iter().map(|g| g.0).collect();
            obj.set_n_vars_per_group(0, &n_vars);
            for (vg, &(_, n_comp, base)) in groups.iter().enumerate() {
                obj.set_n_comp_group(0, vg, n_comp);
                obj.set_vg_dof_base(0, vg, base);
            }
            prop_assert_eq!(obj.buffer().len(), 1 + GROUP_RECORD_LEN * groups.len());

            let mut var = 0;
            for &(n_vars, n_comp, base) in &groups {
                for var_in_group in 0..n_vars {
                    for comp in 0..n_comp {
                        let expected = base + (var_in_group * n_comp + comp) as u64;
                        prop_assert_eq!(obj.dof_number(0, var, comp), expected);
                    }
                    var += 1;
                }
            }
        }
    }
}
