use crate::dof_object::DofObject;
use crate::packed::{GroupRecord, MAX_N_COMP, MAX_N_VARS};
use crate::types::{DofIdType, INVALID_ID};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a layout cannot be applied to a `DofObject`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("system {system}, group {group}: n_comp = {n_comp} exceeds the maximum of {max}")]
    TooManyComponents {
        system: usize,
        group: usize,
        n_comp: usize,
        max: usize,
    },
    #[error("system {system}, group {group}: n_vars = {n_vars} exceeds the maximum of {max}")]
    TooManyVariables {
        system: usize,
        group: usize,
        n_vars: usize,
        max: usize,
    },
    #[error("system {system}, group {group}: DOF base {base} leaves no room for the group's DOFs")]
    BaseOverflow {
        system: usize,
        group: usize,
        base: DofIdType,
    },
    #[error("system {system}, group {group}: DOF base {base} is the reserved invalid id")]
    ReservedBase {
        system: usize,
        group: usize,
        base: DofIdType,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLayout {
    pub n_vars: usize,
    #[serde(default = "default_n_comp")]
    pub n_comp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dof_base: Option<DofIdType>,
}

const fn default_n_comp() -> usize {
    1
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemLayout {
    pub groups: Vec<GroupLayout>,
}

/// Structured description of the systems and variable groups of a `DofObject`, read from and
/// written to JSON config files
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DofLayout {
    pub systems: Vec<SystemLayout>,
}

impl Default for DofLayout {
    /// A single system with a scalar variable followed by a 3-component vector variable
    fn default() -> Self {
        DofLayout {
            systems: vec![SystemLayout {
                groups: vec![
                    GroupLayout {
                        n_vars: 1,
                        n_comp: 1,
                        dof_base: None,
                    },
                    GroupLayout {
                        n_vars: 1,
                        n_comp: 3,
                        dof_base: None,
                    },
                ],
            }],
        }
    }
}

impl DofLayout {
    /// Read back the layout stored in `obj`
    pub fn from_object(obj: &DofObject) -> Self {
        let systems = (0..obj.n_systems())
            .map(|s| SystemLayout {
                groups: (0..obj.n_var_groups(s))
                    .map(|vg| GroupLayout {
                        n_vars: obj.n_vars_group(s, vg),
                        n_comp: obj.n_comp_group(s, vg),
                        dof_base: Some(obj.vg_dof_base(s, vg)).filter(|&b| b != INVALID_ID),
                    })
                    .collect(),
            })
            .collect();

        DofLayout { systems }
    }

    /// Check every group can be stored in a `DofObject`
    pub fn validate(&self) -> Result<(), LayoutError> {
        for (system, sys) in self.systems.iter().enumerate() {
            for (group, g) in sys.groups.iter().enumerate() {
                if g.n_comp > MAX_N_COMP {
                    return Err(LayoutError::TooManyComponents {
                        system,
                        group,
                        n_comp: g.n_comp,
                        max: MAX_N_COMP,
                    });
                }
                if g.n_vars > MAX_N_VARS {
                    return Err(LayoutError::TooManyVariables {
                        system,
                        group,
                        n_vars: g.n_vars,
                        max: MAX_N_VARS,
                    });
                }
                if let Some(base) = g.dof_base {
                    if base == INVALID_ID {
                        return Err(LayoutError::ReservedBase {
                            system,
                            group,
                            base,
                        });
                    }
                    let record = GroupRecord {
                        n_vars: g.n_vars,
                        n_comp: g.n_comp,
                        dof_base: Some(base),
                    };
                    if !record.dofs_fit() {
                        return Err(LayoutError::BaseOverflow {
                            system,
                            group,
                            base,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace the systems of `obj` with this layout. `obj` is untouched if the layout is
    /// invalid.
    pub fn apply(&self, obj: &mut DofObject) -> Result<(), LayoutError> {
        self.validate()?;

        obj.clear_dofs();
        obj.set_n_systems(self.systems.len());
        for (s, sys) in self.systems.iter().enumerate() {
            let n_vars: Vec<_> = sys.groups.iter().map(|g| g.n_vars).collect();
            obj.set_n_vars_per_group(s, &n_vars);

            for (vg, g) in sys.groups.iter().enumerate() {
                obj.set_n_comp_group(s, vg, g.n_comp);
                if let Some(base) = g.dof_base {
                    obj.set_vg_dof_base(s, vg, base);
                }
            }
        }
        Ok(())
    }

    /// Build a fresh `DofObject` with this layout
    pub fn to_object(&self) -> Result<DofObject, LayoutError> {
        let mut obj = DofObject::new();
        self.apply(&mut obj)?;
        Ok(obj)
    }
}
