use crate::dof_object::DofObject;
use crate::types::{DofIdType, INVALID_ID};
use ndarray::prelude::*;
use tracing::{debug, trace};

/// Order in which DOFs are handed out across a set of objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DofOrdering {
    /// All DOFs of one object before moving to the next
    NodeMajor,
    /// All objects for one variable group before moving to the next group
    VarMajor,
}

/// Number the DOFs of system `s` on every object in `objects`, starting at `first_dof`.
///
/// Every object must have the same number of variable groups in `s`. Groups without DOFs on
/// an object have their base unset. Returns one past the last DOF handed out.
pub fn distribute_dofs(
    objects: &mut [DofObject],
    s: usize,
    first_dof: DofIdType,
    ordering: DofOrdering,
) -> DofIdType {
    let mut next = first_dof;

    let number = |obj: &mut DofObject, vg: usize, next: &mut DofIdType| {
        let n_dofs = obj.n_vars_group(s, vg) * obj.n_comp_group(s, vg);
        if n_dofs == 0 {
            obj.set_vg_dof_base(s, vg, INVALID_ID);
        } else {
            obj.set_vg_dof_base(s, vg, *next);
            trace!(id = obj.id(), vg, base = *next, n_dofs, "numbered group");
            *next += n_dofs as DofIdType;
        }
    };

    match ordering {
        DofOrdering::NodeMajor => {
            for obj in objects.iter_mut() {
                for vg in 0..obj.n_var_groups(s) {
                    number(obj, vg, &mut next);
                }
            }
        }
        DofOrdering::VarMajor => {
            let n_groups = objects.first().map_or(0, |obj| obj.n_var_groups(s));
            for vg in 0..n_groups {
                for obj in objects.iter_mut() {
                    assert_eq!(
                        obj.n_var_groups(s),
                        n_groups,
                        "objects disagree on the number of variable groups in system {}",
                        s
                    );
                    number(obj, vg, &mut next);
                }
            }
        }
    }

    debug!(
        system = s,
        n_objects = objects.len(),
        n_dofs = next - first_dof,
        ?ordering,
        "distributed DOFs"
    );
    next
}

/// Values of every component of variable `var` on `obj`, read out of the global vector
/// `solution`
pub fn gather(obj: &DofObject, s: usize, var: usize, solution: ArrayView1<f64>) -> Array1<f64> {
    obj.dof_indices(s, var)
        .into_iter()
        .map(|dof| {
            assert!(dof != INVALID_ID, "variable {} has unnumbered DOFs", var);
            solution[dof as usize]
        })
        .collect()
}

/// Write `values` into the components of variable `var` on `obj` in the global vector
/// `solution`
pub fn scatter(
    obj: &DofObject,
    s: usize,
    var: usize,
    values: ArrayView1<f64>,
    mut solution: ArrayViewMut1<f64>,
) {
    let dofs = obj.dof_indices(s, var);
    assert_eq!(dofs.len(), values.len());

    for (dof, &value) in dofs.into_iter().zip(values.iter()) {
        assert!(dof != INVALID_ID, "variable {} has unnumbered DOFs", var);
        solution[dof as usize] = value;
    }
}
