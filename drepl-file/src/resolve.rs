use std::collections::BTreeMap;
use std::sync::Arc;

use drepl_dtype::{ArrayDType, DType, FieldName, StructDType};
use drepl_error::{DreplResult, drepl_bail, drepl_err};
use drepl_graph::{AffineMap, ArrayLayout, IndexExpr, Layout, StructLayout};

use crate::{CompoundDesc, DTypeDesc, Extent, LayoutDesc};

/// Resolves names in a description against its constants.
pub(crate) struct Resolver<'a> {
    constants: &'a BTreeMap<String, i64>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(constants: &'a BTreeMap<String, i64>) -> Self {
        Self { constants }
    }

    fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    pub(crate) fn extent(&self, extent: &Extent) -> DreplResult<u64> {
        match extent {
            Extent::Literal(n) => Ok(*n),
            Extent::Named(name) => {
                let value = self
                    .constant(name)
                    .ok_or_else(|| drepl_err!(Structural: "constant '{name}' is not defined"))?;
                u64::try_from(value).map_err(|_| {
                    drepl_err!(Configuration: "constant '{name}' = {value} is not a valid extent")
                })
            }
        }
    }

    fn extents(&self, extents: &[Extent]) -> DreplResult<Vec<u64>> {
        extents
            .iter()
            .enumerate()
            .map(|(n, e)| self.extent(e).map_err(|err| err.with_context(format!("dim {n}"))))
            .collect()
    }

    pub(crate) fn dtype(&self, desc: &DTypeDesc) -> DreplResult<DType> {
        match desc {
            DTypeDesc::Primitive(ptype) => Ok(DType::Primitive(*ptype)),
            DTypeDesc::Compound(CompoundDesc::String(len)) => DType::string(self.extent(len)?),
            DTypeDesc::Compound(CompoundDesc::Array(array)) => {
                let element = self
                    .dtype(&array.element)
                    .map_err(|e| e.with_context("array element"))?;
                Ok(DType::Array(Arc::new(ArrayDType::try_new(
                    self.extents(&array.dims)?,
                    element,
                )?)))
            }
            DTypeDesc::Compound(CompoundDesc::Struct(st)) => {
                let mut names: Vec<FieldName> = Vec::with_capacity(st.fields.len());
                let mut dtypes = Vec::with_capacity(st.fields.len());
                for field in &st.fields {
                    dtypes.push(
                        self.dtype(&field.dtype)
                            .map_err(|e| e.with_context(format!("field '{}'", field.name)))?,
                    );
                    names.push(field.name.as_str().into());
                }
                Ok(DType::Struct(StructDType::try_new(names, dtypes)?))
            }
        }
    }

    pub(crate) fn index(&self, expr: &str) -> DreplResult<AffineMap> {
        expr.parse::<IndexExpr>()?
            .to_affine(&|name| self.constant(name))
    }

    /// The layout `desc` gives a variable of type `dtype`; `None` lays it out as declared.
    pub(crate) fn layout(&self, desc: Option<&LayoutDesc>, dtype: &DType) -> DreplResult<Layout> {
        let Some(desc) = desc else {
            return Ok(Layout::identity(dtype));
        };
        match (desc, dtype) {
            (LayoutDesc::Array(array), DType::Array(dt)) => {
                let dims = match &array.dims {
                    Some(dims) => self.extents(dims)?,
                    None => dt.dims().to_vec(),
                };
                let index = match &array.index {
                    Some(index) => index
                        .iter()
                        .enumerate()
                        .map(|(n, expr)| {
                            self.index(expr)
                                .map_err(|e| e.with_context(format!("index {n} '{expr}'")))
                        })
                        .collect::<DreplResult<Vec<_>>>()?,
                    None => (0..dims.len()).map(AffineMap::identity).collect(),
                };
                let element = self
                    .layout(array.element.as_deref(), dt.element())
                    .map_err(|e| e.with_context("array element"))?;
                Ok(Layout::Array(ArrayLayout::new(dims, index, element)))
            }
            (LayoutDesc::Struct(st), DType::Struct(dt)) => {
                let fields = st
                    .fields
                    .iter()
                    .map(|field| {
                        let dtype = dt.field(&field.name).ok_or_else(|| {
                            drepl_err!(Structural: "dataset has no field '{}'", field.name)
                        })?;
                        let layout = self
                            .layout(field.layout.as_ref(), dtype)
                            .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
                        Ok((FieldName::from(field.name.as_str()), layout))
                    })
                    .collect::<DreplResult<Vec<_>>>()?;
                Ok(Layout::Struct(StructLayout::new(fields)))
            }
            (LayoutDesc::Array(_), _) => {
                drepl_bail!(Structural: "view declares an array for dataset type {dtype}")
            }
            (LayoutDesc::Struct(_), _) => {
                drepl_bail!(Structural: "view declares a struct for dataset type {dtype}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use drepl_dtype::PType;
    use drepl_error::DreplError;
    use rstest::rstest;

    use super::*;
    use crate::{
        ArrayDesc, ArrayLayoutDesc, FieldDesc, FieldLayoutDesc, StructDesc, StructLayoutDesc,
    };

    fn constants() -> BTreeMap<String, i64> {
        BTreeMap::from([("N".to_string(), 4), ("NEG".to_string(), -1)])
    }

    fn grid() -> DTypeDesc {
        DTypeDesc::Compound(CompoundDesc::Array(ArrayDesc {
            dims: vec![Extent::Named("N".to_string()), Extent::Literal(3)],
            element: Box::new(DTypeDesc::Compound(CompoundDesc::Struct(StructDesc {
                fields: vec![
                    FieldDesc {
                        name: "a".to_string(),
                        dtype: DTypeDesc::Primitive(PType::I32),
                    },
                    FieldDesc {
                        name: "b".to_string(),
                        dtype: DTypeDesc::Primitive(PType::U8),
                    },
                ],
            }))),
        }))
    }

    #[test]
    fn resolves_dtypes() {
        let constants = constants();
        let resolver = Resolver::new(&constants);
        let dtype = resolver.dtype(&grid()).unwrap();
        assert_eq!(dtype.to_string(), "[4,3]{a: int32, b: uint8}");
        assert_eq!(dtype.byte_size(), 60);

        let string = resolver
            .dtype(&DTypeDesc::Compound(CompoundDesc::String(Extent::Literal(7))))
            .unwrap();
        assert_eq!(string.byte_size(), 8);
    }

    #[rstest]
    #[case(Extent::Named("M".to_string()))]
    #[case(Extent::Named("NEG".to_string()))]
    #[case(Extent::Literal(0))]
    fn bad_extents(#[case] extent: Extent) {
        let constants = constants();
        let desc = DTypeDesc::Compound(CompoundDesc::Array(ArrayDesc {
            dims: vec![extent],
            element: Box::new(DTypeDesc::Primitive(PType::I8)),
        }));
        assert!(Resolver::new(&constants).dtype(&desc).is_err());
    }

    #[test]
    fn resolves_transposed_projection() {
        let constants = constants();
        let resolver = Resolver::new(&constants);
        let dtype = resolver.dtype(&grid()).unwrap();
        let desc = LayoutDesc::Array(ArrayLayoutDesc {
            dims: Some(vec![Extent::Literal(3), Extent::Named("N".to_string())]),
            index: Some(vec!["v1".to_string(), "v0".to_string()]),
            element: Some(Box::new(LayoutDesc::Struct(StructLayoutDesc {
                fields: vec![FieldLayoutDesc {
                    name: "b".to_string(),
                    layout: None,
                }],
            }))),
        });
        let layout = resolver.layout(Some(&desc), &dtype).unwrap();
        layout.validate().unwrap();
        layout.check_against(&dtype).unwrap();

        let Layout::Array(array) = &layout else {
            panic!("expected an array layout");
        };
        assert_eq!(array.dims(), &[3, 4]);
        assert_eq!(array.index(), &[AffineMap::identity(1), AffineMap::identity(0)]);
        assert_eq!(layout.byte_size(), 12);
    }

    #[test]
    fn omitted_layout_is_identity() {
        let constants = constants();
        let resolver = Resolver::new(&constants);
        let dtype = resolver.dtype(&grid()).unwrap();
        assert_eq!(resolver.layout(None, &dtype).unwrap(), Layout::identity(&dtype));
    }

    #[rstest]
    #[case(LayoutDesc::Struct(StructLayoutDesc { fields: vec![] }))]
    #[case(LayoutDesc::Array(ArrayLayoutDesc {
        dims: None,
        index: Some(vec!["v0 * v0".to_string(), "v1".to_string()]),
        element: None,
    }))]
    #[case(LayoutDesc::Array(ArrayLayoutDesc {
        dims: None,
        index: None,
        element: Some(Box::new(LayoutDesc::Struct(StructLayoutDesc {
            fields: vec![FieldLayoutDesc { name: "c".to_string(), layout: None }],
        }))),
    }))]
    fn structural_errors(#[case] desc: LayoutDesc) {
        let constants = constants();
        let resolver = Resolver::new(&constants);
        let dtype = resolver.dtype(&grid()).unwrap();
        let err = resolver.layout(Some(&desc), &dtype).unwrap_err();
        assert!(matches!(err.root(), DreplError::Structural(..)), "{err}");
    }

    #[test]
    fn index_constants() {
        let constants = constants();
        let resolver = Resolver::new(&constants);
        assert_eq!(
            resolver.index("N - 1 - v0").unwrap(),
            AffineMap::new(-1, 3, 0, 1, Some(0))
        );
        assert!(resolver.index("v0 + M").is_err());
    }
}
