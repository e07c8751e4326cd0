use std::sync::Arc;

use drepl_error::{DreplResult, drepl_bail};
use itertools::Itertools;

use crate::{DType, FieldName, MAX_BYTE_SIZE};

/// Type information for a struct column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructDType {
    names: Arc<[FieldName]>,
    dtypes: Arc<[DType]>,
}

impl StructDType {
    /// Create a new [`StructDType`] from a list of names and dtypes.
    ///
    /// Names must be unique and there must be at least one field.
    pub fn try_new(names: Vec<FieldName>, dtypes: Vec<DType>) -> DreplResult<Self> {
        if names.len() != dtypes.len() {
            drepl_bail!(
                "length mismatch between names ({}) and dtypes ({})",
                names.len(),
                dtypes.len()
            );
        }
        if names.is_empty() {
            drepl_bail!(Configuration: "struct must have at least one field");
        }
        if let Some(dup) = names.iter().duplicates().next() {
            drepl_bail!(Structural: "field '{dup}' declared twice");
        }
        let size = dtypes
            .iter()
            .try_fold(0u64, |size, dt| size.checked_add(dt.byte_size()))
            .filter(|size| *size <= MAX_BYTE_SIZE);
        if size.is_none() {
            drepl_bail!(Configuration: "struct is larger than {MAX_BYTE_SIZE} bytes");
        }
        Ok(Self {
            names: names.into(),
            dtypes: dtypes.into(),
        })
    }

    /// Get the names of the fields in the struct
    pub fn names(&self) -> &[FieldName] {
        &self.names
    }

    /// Returns the number of fields in the struct
    pub fn nfields(&self) -> usize {
        self.names.len()
    }

    /// Find the index of a field by name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.as_ref() == name)
    }

    /// Get the type of a field by name
    pub fn field(&self, name: &str) -> Option<&DType> {
        self.find(name).map(|idx| &self.dtypes[idx])
    }

    /// Types of all fields, in declaration order
    pub fn fields(&self) -> &[DType] {
        &self.dtypes
    }

    /// Byte offset of the field at `index` from the start of the struct.
    pub fn field_offset(&self, index: usize) -> u64 {
        self.dtypes[..index].iter().map(DType::byte_size).sum()
    }

    /// Sum of the sizes of all fields.
    pub fn byte_size(&self) -> u64 {
        self.dtypes.iter().map(DType::byte_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArrayDType, PType};

    #[test]
    fn field_offsets_accumulate() {
        let st = StructDType::try_new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![
                DType::Primitive(PType::I8),
                DType::Primitive(PType::I64),
                DType::Primitive(PType::I32),
            ],
        )
        .unwrap();
        assert_eq!(st.field_offset(0), 0);
        assert_eq!(st.field_offset(1), 1);
        assert_eq!(st.field_offset(2), 9);
        assert_eq!(st.byte_size(), 13);
        assert_eq!(st.find("c"), Some(2));
        assert_eq!(st.field("b"), Some(&DType::Primitive(PType::I64)));
    }

    #[test]
    fn duplicate_names_rejected() {
        assert!(
            StructDType::try_new(
                vec!["a".into(), "a".into()],
                vec![DType::Primitive(PType::I8), DType::Primitive(PType::I8)],
            )
            .is_err()
        );
    }

    #[test]
    fn oversized_struct_rejected() {
        let half = DType::Array(Arc::new(
            ArrayDType::try_new(vec![1 << 62], DType::Primitive(PType::U8)).unwrap(),
        ));
        assert!(
            StructDType::try_new(vec!["a".into(), "b".into()], vec![half.clone(), half]).is_err()
        );
    }

    #[test]
    fn empty_struct_rejected() {
        assert!(StructDType::try_new(vec![], vec![]).is_err());
    }
}
