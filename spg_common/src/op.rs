/// Generates the standard operator boilerplate for single-field tuple structs.
///
/// `binary` covers `Add`-style traits, `inplace` covers `AddAssign`-style traits, `unary` covers
/// `Neg`-style traits and `scalar` covers multiplication by a plain integer.
#[macro_export]
macro_rules! op {
    (binary $for_struct:ident, $impl_trait:ident, $impl_fn:ident) => {
        impl $impl_trait for $for_struct {
            type Output = Self;
            fn $impl_fn(self, rhs: Self) -> Self::Output {
                Self(self.0.$impl_fn(rhs.0))
            }
        }
    };

    (inplace $for_struct:ident, $impl_trait:ident, $impl_fn:ident) => {
        impl $impl_trait for $for_struct {
            fn $impl_fn(&mut self, rhs: Self) {
                self.0.$impl_fn(rhs.0)
            }
        }
    };

    (unary $for_struct:ident, $impl_trait:ident, $impl_fn:ident) => {
        impl $impl_trait for $for_struct {
            type Output = Self;
            fn $impl_fn(self) -> Self::Output {
                Self(self.0.$impl_fn())
            }
        }
    };

    (scalar $for_struct:ident, $impl_trait:ident, $impl_fn:ident, $scalar:ty) => {
        impl $impl_trait<$scalar> for $for_struct {
            type Output = Self;
            fn $impl_fn(self, rhs: $scalar) -> Self::Output {
                Self(self.0.$impl_fn(rhs))
            }
        }
    };
}
