use std::fmt::{Display, Formatter};

/// A one-variable fractional-linear index map, `(A·x + B) / (C·x + D)`.
///
/// `x` is the index along one chosen dimension of a multi-index. The map is exact at `x` when the
/// division leaves no remainder; an inexact result means there is no corresponding element.
/// Division truncates toward zero.
///
/// A map is also a 2×2 matrix `[[A, B], [C, D]]`, which gives composition as a matrix product
/// and inversion as the adjugate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AffineMap {
    a: i64,
    b: i64,
    c: i64,
    d: i64,
    dim: Option<usize>,
}

impl AffineMap {
    pub const fn new(a: i64, b: i64, c: i64, d: i64, dim: Option<usize>) -> Self {
        Self { a, b, c, d, dim }
    }

    /// `x` along dimension `dim`.
    pub const fn identity(dim: usize) -> Self {
        Self::new(1, 0, 0, 1, Some(dim))
    }

    /// A map that ignores its input.
    pub const fn constant(value: i64) -> Self {
        Self::new(0, value, 0, 1, None)
    }

    pub const fn coefficients(&self) -> (i64, i64, i64, i64) {
        (self.a, self.b, self.c, self.d)
    }

    /// The input dimension, `None` for constant maps.
    pub const fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub const fn with_dim(self, dim: Option<usize>) -> Self {
        Self { dim, ..self }
    }

    /// Quotient and remainder at `x`.
    ///
    /// Returns `None` when the denominator is zero or the arithmetic overflows.
    pub fn calc(&self, x: i64) -> Option<(i64, i64)> {
        let num = self.a.checked_mul(x)?.checked_add(self.b)?;
        let den = self.c.checked_mul(x)?.checked_add(self.d)?;
        Some((num.checked_div(den)?, num.checked_rem(den)?))
    }

    /// The mapped index at `x`, if the map is exact there.
    pub fn eval(&self, x: i64) -> Option<i64> {
        self.calc(x).and_then(|(q, r)| (r == 0).then_some(q))
    }

    /// Evaluates the map on the selected component of a multi-index.
    pub fn apply(&self, idx: &[u64]) -> Option<i64> {
        let x = match self.dim {
            Some(dim) => i64::try_from(*idx.get(dim)?).ok()?,
            None => 0,
        };
        self.eval(x)
    }

    /// `A·D - B·C`; zero means the map cannot be inverted.
    pub fn determinant(&self) -> Option<i64> {
        self.a
            .checked_mul(self.d)?
            .checked_sub(self.b.checked_mul(self.c)?)
    }

    /// The map from outputs back to inputs. The input dimension is left unset.
    pub fn inverse(&self) -> Option<Self> {
        if self.determinant()? == 0 {
            return None;
        }
        Some(Self::new(
            self.d,
            self.b.checked_neg()?,
            self.c.checked_neg()?,
            self.a,
            None,
        ))
    }

    /// Whether the map is exact at every input.
    pub fn is_integral(&self) -> bool {
        self.c == 0 && self.d != 0 && self.a % self.d == 0 && self.b % self.d == 0
    }

    /// `self ∘ inner`: applies `inner` first, reading `inner`'s input dimension.
    ///
    /// The product is exact exactly where `inner` is exact and `self` is exact on its result.
    /// Returns `None` when a single map cannot express that, as for `2·y` after `x/2`, whose
    /// product `2x/2` would also be exact at odd `x`.
    pub fn compose(&self, inner: &AffineMap) -> Option<Self> {
        if !self.keeps_exactness_of(inner) {
            return None;
        }
        let dot = |x: i64, y: i64, z: i64, w: i64| x.checked_mul(y)?.checked_add(z.checked_mul(w)?);
        Some(Self::new(
            dot(self.a, inner.a, self.b, inner.c)?,
            dot(self.a, inner.b, self.b, inner.d)?,
            dot(self.c, inner.a, self.d, inner.c)?,
            dot(self.c, inner.b, self.d, inner.d)?,
            inner.dim,
        ))
    }

    fn keeps_exactness_of(&self, inner: &AffineMap) -> bool {
        let scalar = self.b == 0 && self.c == 0 && self.a == self.d;
        // with both maps linear, d | A·(a·x + b) implies d | a·x + b once gcd(A, d) = 1
        let coprime = self.c == 0 && inner.c == 0 && gcd(self.a, inner.d) == 1;
        inner.is_integral() || scalar || coprime
    }
}

fn gcd(x: i64, y: i64) -> u64 {
    let (mut x, mut y) = (x.unsigned_abs(), y.unsigned_abs());
    while y != 0 {
        (x, y) = (y, x % y);
    }
    x
}

impl Display for AffineMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let x = match self.dim {
            Some(dim) => format!("v{dim}"),
            None => "_".to_string(),
        };
        write!(f, "({}*{x}{:+})/({}*{x}{:+})", self.a, self.b, self.c, self.d)
    }
}

/// Maps the multi-index `idx` through one map per target dimension into `out`.
///
/// Returns `false` when any component is inexact or falls outside `dims`, the target's shape.
pub fn translate(maps: &[AffineMap], idx: &[u64], dims: &[u64], out: &mut [u64]) -> bool {
    debug_assert_eq!(maps.len(), dims.len());
    for ((map, dim), slot) in maps.iter().zip(dims).zip(out.iter_mut()) {
        match map.apply(idx).and_then(|q| u64::try_from(q).ok()) {
            Some(q) if q < *dim => *slot = q,
            _ => return false,
        }
    }
    true
}
