//! Runtime values, heap instances and addressable slots.
//!
//! The evaluator keeps its state in three shapes. [`Value`] is what lives on the
//! evaluation stack and in variable slots. [`ObjInstance`] is an allocated object, a
//! typed map of named fields shared through [`ObjRef`]. [`Slot`] is the target of a
//! managed pointer: address-of instructions hand out slots over the very cells the
//! frame reads and writes, so a store through a pointer is visible to a later load of
//! the variable itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::metadata::field::FieldRc;
use crate::metadata::method::MethodRc;
use crate::metadata::typesystem::{CilFlavor, CilTypeRc};

/// Shared handle to an allocated instance.
pub type ObjRef = Rc<RefCell<ObjInstance>>;

/// One runtime value on the evaluation stack or in a variable slot.
#[derive(Clone)]
pub enum Value {
    /// The null reference
    Null,
    /// A 32-bit integer; also carries bool and char slots
    I32(i32),
    /// A 64-bit integer; also carries native-int slots
    I64(i64),
    /// A 32-bit float
    F32(f32),
    /// A 64-bit float
    F64(f64),
    /// A string literal
    Str(String),
    /// A reference to an allocated instance
    Obj(ObjRef),
    /// A value boxed into an object reference
    Boxed {
        /// The declared value type
        ty: CilTypeRc,
        /// The payload
        value: Box<Value>,
    },
    /// A managed pointer from `ldloca`, `ldarga`, `ldflda` or `ldsflda`
    Ptr(Slot),
    /// A raw function pointer from `ldftn`
    MethodPtr(MethodRc),
    /// An open delegate capturing its invocation target
    Delegate(MethodRc),
}

impl Value {
    /// The zero value for a slot of the given type, mirroring `initlocals`.
    #[must_use]
    pub fn zero(ty: &CilTypeRc) -> Value {
        match ty.flavor() {
            CilFlavor::Boolean
            | CilFlavor::Char
            | CilFlavor::I1
            | CilFlavor::U1
            | CilFlavor::I2
            | CilFlavor::U2
            | CilFlavor::I4
            | CilFlavor::U4 => Value::I32(0),
            CilFlavor::I8 | CilFlavor::U8 | CilFlavor::I | CilFlavor::U => Value::I64(0),
            CilFlavor::R4 => Value::F32(0.0),
            CilFlavor::R8 => Value::F64(0.0),
            _ => Value::Null,
        }
    }

    /// Branch truth of a stack value, as `brtrue` sees it.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match self {
            Value::Null => false,
            Value::I32(v) => *v != 0,
            Value::I64(v) => *v != 0,
            Value::F32(v) => *v != 0.0,
            Value::F64(v) => *v != 0.0,
            _ => true,
        }
    }

    /// Short category name used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::F32(_) => "float32",
            Value::F64(_) => "float64",
            Value::Str(_) => "string",
            Value::Obj(_) => "object",
            Value::Boxed { .. } => "boxed value",
            Value::Ptr(_) => "managed pointer",
            Value::MethodPtr(_) => "method pointer",
            Value::Delegate(_) => "delegate",
        }
    }
}

/// Numbers and strings compare by value, references by identity, boxes structurally.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => Rc::ptr_eq(a, b),
            (
                Value::Boxed { ty: a_ty, value: a },
                Value::Boxed { ty: b_ty, value: b },
            ) => a_ty.same_as(b_ty) && a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            (Value::MethodPtr(a), Value::MethodPtr(b))
            | (Value::Delegate(a), Value::Delegate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::I32(v) => write!(f, "{v}i32"),
            Value::I64(v) => write!(f, "{v}i64"),
            Value::F32(v) => write!(f, "{v}f32"),
            Value::F64(v) => write!(f, "{v}f64"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Obj(obj) => write!(f, "obj {}", obj.borrow().ty().full_name()),
            Value::Boxed { ty, value } => write!(f, "boxed {} {:?}", ty.name(), value),
            Value::Ptr(slot) => write!(f, "&{slot:?}"),
            Value::MethodPtr(method) => write!(f, "fn {}", method.full_name()),
            Value::Delegate(method) => write!(f, "delegate -> {}", method.full_name()),
        }
    }
}

/// A heap instance: its type plus named field storage.
///
/// Fields materialize on first write; a read of an untouched field yields the zero
/// value of the field's declared type, which is what a freshly allocated object holds.
pub struct ObjInstance {
    ty: CilTypeRc,
    fields: HashMap<String, Value>,
}

impl ObjInstance {
    /// Allocate an empty instance of `ty`.
    #[must_use]
    pub fn allocate(ty: &CilTypeRc) -> ObjRef {
        Rc::new(RefCell::new(ObjInstance {
            ty: ty.clone(),
            fields: HashMap::new(),
        }))
    }

    /// The instance's type.
    #[must_use]
    pub fn ty(&self) -> &CilTypeRc {
        &self.ty
    }

    /// Read a field, zero-initialized until first written.
    #[must_use]
    pub fn field(&self, field: &FieldRc) -> Value {
        self.fields
            .get(&field.name)
            .cloned()
            .unwrap_or_else(|| Value::zero(&field.ty))
    }

    /// Write a field.
    pub fn set_field(&mut self, field: &FieldRc, value: Value) {
        self.fields.insert(field.name.clone(), value);
    }
}

// Cyclic object graphs are legal; printing stays shallow.
impl fmt::Debug for ObjInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjInstance")
            .field("ty", &self.ty.full_name())
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// An addressable storage location behind a managed pointer.
#[derive(Clone)]
pub enum Slot {
    /// A local or argument cell of the frame that took the address
    Cell(Rc<RefCell<Value>>),
    /// A static field, resolved against the interpreter's static store
    StaticField(FieldRc),
    /// An instance field of an allocated object
    Field(ObjRef, FieldRc),
}

/// Slots compare by location identity, never by the value stored there.
impl PartialEq for Slot {
    fn eq(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Cell(a), Slot::Cell(b)) => Rc::ptr_eq(a, b),
            (Slot::StaticField(a), Slot::StaticField(b)) => Arc::ptr_eq(a, b),
            (Slot::Field(a_obj, a_field), Slot::Field(b_obj, b_field)) => {
                Rc::ptr_eq(a_obj, b_obj) && Arc::ptr_eq(a_field, b_field)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Cell(_) => f.write_str("cell"),
            Slot::StaticField(field) => write!(f, "static {}", field.name),
            Slot::Field(_, field) => write!(f, "field {}", field.name),
        }
    }
}
