//! Variable slots and how they combine into typed variables.
//!
//! Every 4-byte slot a program reserves gets its own entry. Slots that are
//! copied, assigned or passed as one value are merged into a group, and each
//! group is printed as one variable whose type is widened from the types of
//! its slots: one slot is a scalar, three floats are a vector and anything
//! else becomes a synthesized struct.

use std::sync::Arc;

use hashbrown::HashSet;

use crate::decompiler::nodes::{NodeId, VarId};
use crate::types::{DataType, StructMember, StructType};

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    /// Scalar type, `Unknown` until some use pins it down.
    pub ty: DataType,
    pub decl: Option<NodeId>,
    /// Read or written since it was declared.
    pub used: bool,
}

/// Program-wide table of slots.
#[derive(Debug, Default)]
pub(crate) struct Vars {
    slots: Vec<Slot>,
    parent: Vec<VarId>,
    /// Multi-slot runs that were accessed as one value.
    runs: HashSet<(VarId, usize)>,
}

impl Vars {
    pub fn add(&mut self, ty: DataType) -> VarId {
        let id = self.slots.len();
        self.slots.push(Slot {
            ty,
            decl: None,
            used: false,
        });
        self.parent.push(id);
        id
    }

    pub fn slot(&self, var: VarId) -> &Slot {
        &self.slots[var]
    }

    pub fn slot_mut(&mut self, var: VarId) -> &mut Slot {
        &mut self.slots[var]
    }

    fn find(&self, mut var: VarId) -> VarId {
        while self.parent[var] != var {
            var = self.parent[var];
        }
        var
    }

    /// Merges `count` consecutive slots from `first` into one group.
    pub fn merge(&mut self, first: VarId, count: usize) {
        if count < 2 {
            return;
        }
        self.runs.insert((first, count));
        for var in first + 1..first + count {
            let (a, b) = (self.find(first), self.find(var));
            if a != b {
                // The lowest slot stays the root, so a root is where its group starts.
                self.parent[a.max(b)] = a.min(b);
            }
        }
    }

    /// First slot and length of the group holding `var`.
    pub fn group(&self, var: VarId) -> (VarId, usize) {
        let root = self.find(var);
        let len = (root..self.slots.len())
            .take_while(|v| self.find(*v) == root)
            .count();
        (root, len)
    }

    pub fn is_group_start(&self, var: VarId) -> bool {
        self.find(var) == var
    }

    /// The slots of `first..first + count` as written by a value of type `ty`.
    pub fn hint(&mut self, first: VarId, count: usize, ty: &DataType) {
        let slots: Vec<DataType> = match ty {
            DataType::Vector | DataType::Struct(_) => ty
                .slot_qualifiers()
                .into_iter()
                .filter_map(DataType::from_qualifier)
                .collect(),
            other if other.qualifier().is_some() => vec![other.clone()],
            _ => return,
        };
        if slots.len() != count {
            return;
        }
        for (offset, slot_ty) in slots.into_iter().enumerate() {
            let slot = &mut self.slots[first + offset];
            if !slot.ty.is_known() {
                slot.ty = slot_ty;
            }
        }
    }

    /// Type of a run read as one value, as far as the slots tell.
    pub fn run_type(&self, first: VarId, count: usize) -> DataType {
        match count {
            1 => self.slots[first].ty.clone(),
            3 if (first..first + 3).all(|v| self.slots[v].ty == DataType::Float) => DataType::Vector,
            _ => DataType::Unknown,
        }
    }

    fn scalar(&self, var: VarId) -> DataType {
        match &self.slots[var].ty {
            DataType::Unknown => DataType::Int,
            known => known.clone(),
        }
    }

    /// Members of the group at `start`: offset, slot count and type.
    /// Three-float runs used as one value become vector members.
    pub fn members(&self, start: VarId, len: usize) -> Vec<(usize, usize, DataType)> {
        let mut members = Vec::new();
        let mut at = 0;
        while at < len {
            let var = start + at;
            let vector = len != 3
                && at + 3 <= len
                && self.runs.contains(&(var, 3))
                && (var..var + 3).all(|v| self.slots[v].ty == DataType::Float);
            if vector {
                members.push((at, 3, DataType::Vector));
                at += 3;
            } else {
                members.push((at, 1, self.scalar(var)));
                at += 1;
            }
        }
        members
    }

    /// The declared type of the group holding `var`.
    pub fn group_type(&self, var: VarId, structs: &mut Structs) -> DataType {
        let (start, len) = self.group(var);
        match len {
            1 => self.scalar(start),
            3 if (start..start + 3).all(|v| self.slots[v].ty == DataType::Float) => DataType::Vector,
            _ => {
                let members = self.members(start, len);
                DataType::Struct(structs.intern(members.into_iter().map(|(_, _, ty)| ty).collect()))
            }
        }
    }
}

/// Struct types synthesized for multi-slot groups, one per member layout.
#[derive(Debug, Default)]
pub(crate) struct Structs {
    defined: Vec<Arc<StructType>>,
}

impl Structs {
    pub fn intern(&mut self, members: Vec<DataType>) -> Arc<StructType> {
        if let Some(existing) = self.defined.iter().find(|st| {
            st.members.len() == members.len()
                && st.members.iter().zip(&members).all(|(m, ty)| m.ty == *ty)
        }) {
            return existing.clone();
        }
        let st = Arc::new(StructType {
            name: format!("struct{}", self.defined.len() + 1),
            members: members
                .into_iter()
                .enumerate()
                .map(|(n, ty)| StructMember {
                    name: format!("m{}", n + 1),
                    ty,
                })
                .collect(),
        });
        self.defined.push(st.clone());
        st
    }

    pub fn definitions(&self) -> &[Arc<StructType>] {
        &self.defined
    }
}

/// The first id when `ids` are consecutive.
pub(crate) fn consecutive(ids: &[VarId]) -> Option<VarId> {
    let first = *ids.first()?;
    ids.iter()
        .enumerate()
        .all(|(n, id)| *id == first + n)
        .then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn locals(vars: &mut Vars, types: &[DataType]) -> VarId {
        let first = vars.add(types[0].clone());
        for ty in &types[1..] {
            vars.add(ty.clone());
        }
        first
    }

    #[test]
    fn test_merge_groups_runs() {
        let mut vars = Vars::default();
        let a = locals(&mut vars, &[const { DataType::Int }; 5]);
        vars.merge(a + 1, 2);
        vars.merge(a + 2, 2);
        assert_eq!(vars.group(a + 3), (a + 1, 3));
        assert_eq!(vars.group(a), (a, 1));
        assert!(vars.is_group_start(a + 1));
        assert!(!vars.is_group_start(a + 2));
    }

    #[test]
    fn test_group_types_widen() {
        let mut vars = Vars::default();
        let mut structs = Structs::default();
        let v = locals(&mut vars, &[const { DataType::Float }; 3]);
        vars.merge(v, 3);
        assert_eq!(vars.group_type(v, &mut structs), DataType::Vector);

        let s = locals(
            &mut vars,
            &[
                DataType::Float,
                DataType::Float,
                DataType::Float,
                DataType::String,
            ],
        );
        vars.merge(s, 3);
        vars.merge(s, 4);
        let DataType::Struct(st) = vars.group_type(s, &mut structs) else {
            panic!("expected a struct");
        };
        assert_eq!(st.name, "struct1");
        assert_eq!(st.members[0].ty, DataType::Vector);
        assert_eq!(st.members[1].ty, DataType::String);

        let t = locals(&mut vars, &[DataType::Unknown, DataType::Unknown]);
        vars.merge(t, 2);
        let other = vars.group_type(t, &mut structs);
        assert_eq!(other.to_string(), "struct struct2");
        let again = locals(&mut vars, &[DataType::Int, DataType::Int]);
        vars.merge(again, 2);
        assert_eq!(vars.group_type(again, &mut structs), other);
        assert_eq!(structs.definitions().len(), 2);
    }

    #[test]
    fn test_hints_fill_unknown_slots_only() {
        let mut vars = Vars::default();
        let v = locals(&mut vars, &[DataType::Unknown, DataType::Unknown, DataType::Int]);
        vars.hint(v, 3, &DataType::Vector);
        assert_eq!(vars.run_type(v, 2), DataType::Unknown);
        assert_eq!(vars.slot(v).ty, DataType::Float);
        assert_eq!(vars.slot(v + 2).ty, DataType::Int);
        vars.hint(v + 2, 1, &DataType::String);
        assert_eq!(vars.slot(v + 2).ty, DataType::Int);
    }

    #[test]
    fn test_consecutive() {
        assert_eq!(consecutive(&[4, 5, 6]), Some(4));
        assert_eq!(consecutive(&[4, 6]), None);
        assert_eq!(consecutive(&[]), None);
    }
}
