//! Type kind classification used by the assignability analyzer and instruction synthesis.

/// The fundamental kind of a [`crate::metadata::typesystem::CilType`].
///
/// Flavors drive every decision the engine makes about a type: whether substituting a value
/// of it at an injection site needs a `box`, whether a receiver arrives by reference, and
/// which assignability rule applies. Named types (classes, value types, interfaces) carry
/// their identity in the owning `CilType`; the flavor only records the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CilFlavor {
    /// No type (method return only)
    Void,
    /// Boolean value
    Boolean,
    /// UTF-16 character
    Char,
    /// Signed 8-bit integer
    I1,
    /// Unsigned 8-bit integer
    U1,
    /// Signed 16-bit integer
    I2,
    /// Unsigned 16-bit integer
    U2,
    /// Signed 32-bit integer
    I4,
    /// Unsigned 32-bit integer
    U4,
    /// Signed 64-bit integer
    I8,
    /// Unsigned 64-bit integer
    U8,
    /// 32-bit floating point
    R4,
    /// 64-bit floating point
    R8,
    /// Native-sized signed integer
    I,
    /// Native-sized unsigned integer
    U,
    /// The root object type
    Object,
    /// The immutable string type
    String,
    /// A user-defined reference type
    Class,
    /// A user-defined value type
    ValueType,
    /// An interface contract
    Interface,
    /// A single-dimensional array; the element is the owning type's element type
    Array,
    /// An unmanaged pointer to the owning type's element type
    Pointer,
    /// A managed reference to the owning type's element type
    ByRef,
    /// A generic type instantiated with concrete arguments
    GenericInstance,
    /// A generic parameter awaiting substitution
    GenericParameter {
        /// Zero-based position in the declaring type's parameter list
        index: u32,
    },
}

impl CilFlavor {
    /// `true` for built-in primitive value flavors (numerics, bool, char, native ints).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            CilFlavor::Boolean
                | CilFlavor::Char
                | CilFlavor::I1
                | CilFlavor::U1
                | CilFlavor::I2
                | CilFlavor::U2
                | CilFlavor::I4
                | CilFlavor::U4
                | CilFlavor::I8
                | CilFlavor::U8
                | CilFlavor::R4
                | CilFlavor::R8
                | CilFlavor::I
                | CilFlavor::U
        )
    }

    /// `true` for flavors whose values live inline rather than behind a reference.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.is_primitive() || matches!(self, CilFlavor::ValueType)
    }

    /// `true` for flavors whose values are object references.
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        matches!(
            self,
            CilFlavor::Object
                | CilFlavor::String
                | CilFlavor::Class
                | CilFlavor::Interface
                | CilFlavor::Array
        )
    }

    /// `true` for the wrapper flavors that carry an element type.
    #[must_use]
    pub fn has_element(&self) -> bool {
        matches!(
            self,
            CilFlavor::Array | CilFlavor::Pointer | CilFlavor::ByRef
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_classification() {
        assert!(CilFlavor::I4.is_primitive());
        assert!(CilFlavor::Boolean.is_primitive());
        assert!(CilFlavor::U.is_primitive());
        assert!(!CilFlavor::Object.is_primitive());
        assert!(!CilFlavor::String.is_primitive());
        assert!(!CilFlavor::ValueType.is_primitive());
    }

    #[test]
    fn value_vs_reference() {
        assert!(CilFlavor::ValueType.is_value_type());
        assert!(CilFlavor::R8.is_value_type());
        assert!(!CilFlavor::Class.is_value_type());

        assert!(CilFlavor::String.is_reference_type());
        assert!(CilFlavor::Array.is_reference_type());
        assert!(!CilFlavor::I4.is_reference_type());
        assert!(!CilFlavor::ByRef.is_reference_type());
    }

    #[test]
    fn wrappers_carry_elements() {
        assert!(CilFlavor::ByRef.has_element());
        assert!(CilFlavor::Pointer.has_element());
        assert!(!CilFlavor::GenericInstance.has_element());
    }
}
