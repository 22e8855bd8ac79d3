//! The instruction dispatch loop.
//!
//! [`Interpreter::invoke`] runs a method frame by frame: arguments and locals live in
//! shared cells so address-of instructions alias them, the evaluation stack holds
//! [`Value`]s, and static fields persist across invocations in the interpreter itself.
//! Calls re-enter the loop; a bodyless `Invoke` dispatches the delegate on top of the
//! receiver slot instead. Both a call-depth and a per-invocation step budget bound the
//! damage a misrewritten body can do.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use thiserror::Error;
use tracing::trace;

use crate::assembly::{MethodBody, Opcode, Operand};
use crate::emulation::value::{ObjInstance, ObjRef, Slot, Value};
use crate::metadata::field::FieldRc;
use crate::metadata::method::MethodRc;
use crate::metadata::typesystem::CilTypeRc;

const DEFAULT_MAX_DEPTH: usize = 64;
const DEFAULT_MAX_STEPS: usize = 1_000_000;

/// Failure surfaced while evaluating a method body.
#[derive(Error, Debug)]
pub enum EmulationError {
    /// An instruction popped more values than the stack held.
    #[error("evaluation stack underflow")]
    StackUnderflow,
    /// A value had the wrong shape for the instruction consuming it.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the instruction required
        expected: &'static str,
        /// What the stack held
        found: &'static str,
    },
    /// An instruction named a local the executing body does not declare.
    #[error("local '{0}' is not declared by the executing body")]
    UnknownLocal(String),
    /// A compact local form indexed past the frame.
    #[error("local index {index} out of bounds for {count} slots")]
    LocalOutOfBounds {
        /// Requested slot
        index: usize,
        /// Declared slots
        count: usize,
    },
    /// An argument index exceeded the frame.
    #[error("argument index {index} out of bounds for {count} slots")]
    ArgumentOutOfBounds {
        /// Requested slot
        index: usize,
        /// Frame slots, receiver included
        count: usize,
    },
    /// The supplied arguments did not match the target's slots.
    #[error("'{method}' takes {expected} arguments, {found} were supplied")]
    ArgumentCountMismatch {
        /// Target method
        method: String,
        /// Slot count, receiver included
        expected: usize,
        /// Values supplied
        found: usize,
    },
    /// A null reference was dereferenced.
    #[error("null reference")]
    NullReference,
    /// Integer division or remainder by zero.
    #[error("integer division by zero")]
    DivideByZero,
    /// A call target carries no body and is not a dispatchable delegate member.
    #[error("'{0}' has no body to execute")]
    MissingBody(String),
    /// A call shape the evaluator does not model.
    #[error("unsupported call: {0}")]
    UnsupportedCall(String),
    /// An opcode outside the modelled set.
    #[error("unsupported opcode '{0}'")]
    UnsupportedOpcode(Opcode),
    /// An instruction carried an operand of the wrong kind.
    #[error("malformed operand for '{0}'")]
    BadOperand(Opcode),
    /// A branch operand no longer points into the executing body.
    #[error("branch target is no longer part of the executing body")]
    DanglingBranch,
    /// Control fell off the end of a body without `ret`.
    #[error("control reached the end of the body without ret")]
    MissingReturn,
    /// Nested calls exceeded the budget.
    #[error("call depth exceeded the limit of {0}")]
    CallDepthExceeded(usize),
    /// A single invocation exceeded its instruction budget.
    #[error("step budget of {0} instructions exhausted")]
    StepLimitExceeded(usize),
}

/// Executes method bodies over the shared instruction graph.
///
/// The interpreter owns the static field store, so state written by one invocation is
/// visible to the next. Everything else is per-frame.
pub struct Interpreter {
    /// Static store keyed by field address; the kept handle pins the address.
    statics: HashMap<usize, (FieldRc, Value)>,
    max_depth: usize,
    max_steps: usize,
}

impl Interpreter {
    /// A fresh interpreter with default budgets.
    #[must_use]
    pub fn new() -> Interpreter {
        Interpreter::with_limits(DEFAULT_MAX_DEPTH, DEFAULT_MAX_STEPS)
    }

    /// A fresh interpreter with explicit call-depth and step budgets.
    #[must_use]
    pub fn with_limits(max_depth: usize, max_steps: usize) -> Interpreter {
        Interpreter {
            statics: HashMap::new(),
            max_depth,
            max_steps,
        }
    }

    /// Preload a static field before running anything.
    pub fn set_static(&mut self, field: &FieldRc, value: Value) {
        self.statics
            .insert(Interpreter::static_key(field), (field.clone(), value));
    }

    /// Current value of a static field, zero until first written.
    #[must_use]
    pub fn static_value(&self, field: &FieldRc) -> Value {
        self.statics
            .get(&Interpreter::static_key(field))
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| Value::zero(&field.ty))
    }

    /// Run a method with the given argument values and hand back its return value.
    ///
    /// Instance methods take their receiver as the first value. Void methods yield
    /// [`Value::Null`].
    pub fn invoke(
        &mut self,
        method: &MethodRc,
        args: Vec<Value>,
    ) -> Result<Value, EmulationError> {
        self.call(method, args, 0)
    }

    fn static_key(field: &FieldRc) -> usize {
        Arc::as_ptr(field) as usize
    }

    fn call(
        &mut self,
        method: &MethodRc,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EmulationError> {
        if depth >= self.max_depth {
            return Err(EmulationError::CallDepthExceeded(self.max_depth));
        }
        trace!(method = %method.full_name(), depth, "evaluating");

        let guard = read_lock!(method.body);
        match guard.as_ref() {
            Some(body) => self.run(method, body, args, depth),
            None => self.dispatch_bodyless(method, args, depth),
        }
    }

    // Delegate members are synthesized without bodies; Invoke dispatches to the
    // captured target, everything else is a hard stop.
    fn dispatch_bodyless(
        &mut self,
        method: &MethodRc,
        mut args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EmulationError> {
        if method.name == "Invoke" && !args.is_empty() {
            let receiver = args.remove(0);
            return match receiver {
                Value::Delegate(target) => self.call(&target, args, depth + 1),
                other => Err(EmulationError::TypeMismatch {
                    expected: "delegate",
                    found: other.kind(),
                }),
            };
        }
        Err(EmulationError::MissingBody(method.full_name()))
    }

    // `ldnull; ldftn target; newobj ctor` is the delegate creation shape the wiring
    // layer emits; a bodyless two-argument constructor is dispatched as one.
    fn construct(
        &mut self,
        constructor: &MethodRc,
        mut values: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EmulationError> {
        if !constructor.has_body() && values.len() == 2 {
            if let Value::MethodPtr(target) = &values[1] {
                return Ok(Value::Delegate(target.clone()));
            }
        }
        let declaring = constructor.declaring().ok_or_else(|| {
            EmulationError::UnsupportedCall(format!(
                "constructor '{}' has no declaring type",
                constructor.full_name()
            ))
        })?;
        let instance = ObjInstance::allocate(&declaring);
        let mut args = Vec::with_capacity(values.len() + 1);
        args.push(Value::Obj(instance.clone()));
        args.append(&mut values);
        self.call(constructor, args, depth + 1)?;
        Ok(Value::Obj(instance))
    }

    fn run(
        &mut self,
        method: &MethodRc,
        body: &MethodBody,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, EmulationError> {
        let slots = method.arg_slots();
        if args.len() != slots.len() {
            return Err(EmulationError::ArgumentCountMismatch {
                method: method.full_name(),
                expected: slots.len(),
                found: args.len(),
            });
        }

        // Arguments and locals live in shared cells so ldarga/ldloca alias them.
        let frame_args: Vec<Rc<RefCell<Value>>> = args
            .into_iter()
            .map(|value| Rc::new(RefCell::new(value)))
            .collect();
        let frame_locals: Vec<Rc<RefCell<Value>>> = body
            .locals
            .iter()
            .map(|local| Rc::new(RefCell::new(Value::zero(&local.ty))))
            .collect();

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        let mut steps = 0usize;

        while pc < body.len() {
            steps += 1;
            if steps > self.max_steps {
                return Err(EmulationError::StepLimitExceeded(self.max_steps));
            }

            let node = body.instructions[pc].clone();
            let instruction = read_lock!(node);
            let opcode = instruction.opcode;
            pc += 1;

            // Compact forms carry their operand in the opcode itself.
            if let Some(value) = opcode.ldc_i4_embedded() {
                stack.push(Value::I32(value));
                continue;
            }
            if let Some(index) = opcode.ldarg_embedded() {
                let value = arg_cell(&frame_args, usize::from(index))?.borrow().clone();
                stack.push(value);
                continue;
            }
            if let Some(index) = opcode.ldloc_embedded() {
                let value = indexed_local(&frame_locals, usize::from(index))?
                    .borrow()
                    .clone();
                stack.push(value);
                continue;
            }
            if let Some(index) = opcode.stloc_embedded() {
                let value = pop(&mut stack)?;
                *indexed_local(&frame_locals, usize::from(index))?.borrow_mut() = value;
                continue;
            }

            match opcode {
                Opcode::Nop => {}
                Opcode::Dup => {
                    let top = stack.last().cloned().ok_or(EmulationError::StackUnderflow)?;
                    stack.push(top);
                }
                Opcode::Pop => {
                    pop(&mut stack)?;
                }
                Opcode::Ret => {
                    return if method.has_return() {
                        pop(&mut stack)
                    } else {
                        Ok(Value::Null)
                    };
                }

                Opcode::Ldnull => stack.push(Value::Null),
                Opcode::LdcI4 | Opcode::LdcI4S => match &instruction.operand {
                    Operand::Int32(value) => stack.push(Value::I32(*value)),
                    _ => return Err(EmulationError::BadOperand(opcode)),
                },
                Opcode::LdcI8 => match &instruction.operand {
                    Operand::Int64(value) => stack.push(Value::I64(*value)),
                    _ => return Err(EmulationError::BadOperand(opcode)),
                },
                Opcode::LdcR4 => match &instruction.operand {
                    Operand::Float32(value) => stack.push(Value::F32(*value)),
                    _ => return Err(EmulationError::BadOperand(opcode)),
                },
                Opcode::LdcR8 => match &instruction.operand {
                    Operand::Float64(value) => stack.push(Value::F64(*value)),
                    _ => return Err(EmulationError::BadOperand(opcode)),
                },
                Opcode::Ldstr => match &instruction.operand {
                    Operand::String(value) => stack.push(Value::Str(value.clone())),
                    _ => return Err(EmulationError::BadOperand(opcode)),
                },

                Opcode::Ldarg | Opcode::LdargS => {
                    let index = argument_index(&instruction.operand, opcode)?;
                    let value = arg_cell(&frame_args, index)?.borrow().clone();
                    stack.push(value);
                }
                Opcode::Ldarga | Opcode::LdargaS => {
                    let index = argument_index(&instruction.operand, opcode)?;
                    let cell = arg_cell(&frame_args, index)?.clone();
                    stack.push(Value::Ptr(Slot::Cell(cell)));
                }
                Opcode::Starg | Opcode::StargS => {
                    let index = argument_index(&instruction.operand, opcode)?;
                    let value = pop(&mut stack)?;
                    *arg_cell(&frame_args, index)?.borrow_mut() = value;
                }

                Opcode::Ldloc | Opcode::LdlocS => {
                    let value = named_local(body, &frame_locals, &instruction.operand, opcode)?
                        .borrow()
                        .clone();
                    stack.push(value);
                }
                Opcode::Ldloca | Opcode::LdlocaS => {
                    let cell =
                        named_local(body, &frame_locals, &instruction.operand, opcode)?.clone();
                    stack.push(Value::Ptr(Slot::Cell(cell)));
                }
                Opcode::Stloc | Opcode::StlocS => {
                    let value = pop(&mut stack)?;
                    *named_local(body, &frame_locals, &instruction.operand, opcode)?
                        .borrow_mut() = value;
                }

                Opcode::Br | Opcode::BrS => {
                    pc = branch_target(body, &instruction.operand, opcode)?;
                }
                Opcode::Brtrue | Opcode::BrtrueS | Opcode::Brfalse | Opcode::BrfalseS => {
                    let value = pop(&mut stack)?;
                    let wanted = matches!(opcode, Opcode::Brtrue | Opcode::BrtrueS);
                    if value.is_true() == wanted {
                        pc = branch_target(body, &instruction.operand, opcode)?;
                    }
                }
                Opcode::Beq | Opcode::BeqS | Opcode::BneUn | Opcode::BneUnS => {
                    let (a, b) = pop2(&mut stack)?;
                    let wanted = matches!(opcode, Opcode::Beq | Opcode::BeqS);
                    if (a == b) == wanted {
                        pc = branch_target(body, &instruction.operand, opcode)?;
                    }
                }
                Opcode::Bge
                | Opcode::BgeS
                | Opcode::BgeUn
                | Opcode::BgeUnS
                | Opcode::Bgt
                | Opcode::BgtS
                | Opcode::BgtUn
                | Opcode::BgtUnS
                | Opcode::Ble
                | Opcode::BleS
                | Opcode::BleUn
                | Opcode::BleUnS
                | Opcode::Blt
                | Opcode::BltS
                | Opcode::BltUn
                | Opcode::BltUnS => {
                    let (a, b) = pop2(&mut stack)?;
                    if ordered_branch(opcode, &a, &b)? {
                        pc = branch_target(body, &instruction.operand, opcode)?;
                    }
                }
                Opcode::Switch => {
                    let index = match pop(&mut stack)? {
                        Value::I32(index) => index,
                        other => {
                            return Err(EmulationError::TypeMismatch {
                                expected: "int32",
                                found: other.kind(),
                            })
                        }
                    };
                    let Operand::Switch(targets) = &instruction.operand else {
                        return Err(EmulationError::BadOperand(opcode));
                    };
                    // Out-of-range selectors fall through.
                    if let Ok(index) = usize::try_from(index) {
                        if let Some(target) = targets.get(index) {
                            pc = body
                                .resolve_target(target)
                                .ok_or(EmulationError::DanglingBranch)?;
                        }
                    }
                }

                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::DivUn
                | Opcode::Rem
                | Opcode::RemUn
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::ShrUn => {
                    let (a, b) = pop2(&mut stack)?;
                    stack.push(binary(opcode, &a, &b)?);
                }
                Opcode::Neg | Opcode::Not => {
                    let value = pop(&mut stack)?;
                    stack.push(unary(opcode, value)?);
                }
                Opcode::Ceq => {
                    let (a, b) = pop2(&mut stack)?;
                    stack.push(Value::I32(i32::from(a == b)));
                }
                Opcode::Cgt | Opcode::CgtUn | Opcode::Clt | Opcode::CltUn => {
                    let (a, b) = pop2(&mut stack)?;
                    let unsigned = matches!(opcode, Opcode::CgtUn | Opcode::CltUn);
                    let verdict = match ordering(&a, &b, unsigned)? {
                        Some(Ordering::Greater) => {
                            matches!(opcode, Opcode::Cgt | Opcode::CgtUn)
                        }
                        Some(Ordering::Less) => matches!(opcode, Opcode::Clt | Opcode::CltUn),
                        _ => false,
                    };
                    stack.push(Value::I32(i32::from(verdict)));
                }

                Opcode::Ldfld => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    let receiver = pop(&mut stack)?;
                    let instance = self.instance_of(receiver)?;
                    let value = instance.borrow().field(field);
                    stack.push(value);
                }
                Opcode::Ldflda => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    let receiver = pop(&mut stack)?;
                    let instance = self.instance_of(receiver)?;
                    stack.push(Value::Ptr(Slot::Field(instance, field.clone())));
                }
                Opcode::Stfld => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    let value = pop(&mut stack)?;
                    let receiver = pop(&mut stack)?;
                    let instance = self.instance_of(receiver)?;
                    instance.borrow_mut().set_field(field, value);
                }
                Opcode::Ldsfld => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    stack.push(self.static_value(field));
                }
                Opcode::Ldsflda => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    stack.push(Value::Ptr(Slot::StaticField(field.clone())));
                }
                Opcode::Stsfld => {
                    let field = field_operand(&instruction.operand, opcode)?;
                    let value = pop(&mut stack)?;
                    self.set_static(field, value);
                }

                Opcode::Ldobj => {
                    let slot = expect_pointer(pop(&mut stack)?)?;
                    stack.push(self.load_slot(&slot));
                }
                Opcode::Stobj => {
                    let value = pop(&mut stack)?;
                    let slot = expect_pointer(pop(&mut stack)?)?;
                    self.store_slot(&slot, value);
                }
                Opcode::Box => {
                    let ty = type_operand(&instruction.operand, opcode)?;
                    let value = pop(&mut stack)?;
                    stack.push(Value::Boxed {
                        ty: ty.clone(),
                        value: Box::new(value),
                    });
                }
                Opcode::UnboxAny => match pop(&mut stack)? {
                    Value::Boxed { value, .. } => stack.push(*value),
                    Value::Null => return Err(EmulationError::NullReference),
                    // unbox.any on a reference type is a cast; it passes through
                    other => stack.push(other),
                },

                Opcode::Call | Opcode::Callvirt => {
                    let callee = method_operand(&instruction.operand, opcode)?.clone();
                    let values = pop_arguments(&mut stack, callee.arg_slots().len())?;
                    let result = self.call(&callee, values, depth + 1)?;
                    if callee.has_return() {
                        stack.push(result);
                    }
                }
                Opcode::Newobj => {
                    let constructor = method_operand(&instruction.operand, opcode)?.clone();
                    let values = pop_arguments(&mut stack, constructor.params.len())?;
                    let instance = self.construct(&constructor, values, depth)?;
                    stack.push(instance);
                }
                Opcode::Ldftn => {
                    let target = method_operand(&instruction.operand, opcode)?;
                    stack.push(Value::MethodPtr(target.clone()));
                }

                other => return Err(EmulationError::UnsupportedOpcode(other)),
            }
        }

        Err(EmulationError::MissingReturn)
    }

    // Field access accepts an object reference directly or through a managed pointer.
    fn instance_of(&self, value: Value) -> Result<ObjRef, EmulationError> {
        match value {
            Value::Obj(instance) => Ok(instance),
            Value::Ptr(slot) => match self.load_slot(&slot) {
                Value::Obj(instance) => Ok(instance),
                Value::Null => Err(EmulationError::NullReference),
                other => Err(EmulationError::TypeMismatch {
                    expected: "object",
                    found: other.kind(),
                }),
            },
            Value::Null => Err(EmulationError::NullReference),
            other => Err(EmulationError::TypeMismatch {
                expected: "object",
                found: other.kind(),
            }),
        }
    }

    fn load_slot(&self, slot: &Slot) -> Value {
        match slot {
            Slot::Cell(cell) => cell.borrow().clone(),
            Slot::StaticField(field) => self.static_value(field),
            Slot::Field(instance, field) => instance.borrow().field(field),
        }
    }

    fn store_slot(&mut self, slot: &Slot, value: Value) {
        match slot {
            Slot::Cell(cell) => *cell.borrow_mut() = value,
            Slot::StaticField(field) => self.set_static(field, value),
            Slot::Field(instance, field) => instance.borrow_mut().set_field(field, value),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("statics", &self.statics.len())
            .field("max_depth", &self.max_depth)
            .field("max_steps", &self.max_steps)
            .finish_non_exhaustive()
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, EmulationError> {
    stack.pop().ok_or(EmulationError::StackUnderflow)
}

fn pop2(stack: &mut Vec<Value>) -> Result<(Value, Value), EmulationError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    Ok((a, b))
}

fn pop_arguments(stack: &mut Vec<Value>, count: usize) -> Result<Vec<Value>, EmulationError> {
    if stack.len() < count {
        return Err(EmulationError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - count))
}

fn expect_pointer(value: Value) -> Result<Slot, EmulationError> {
    match value {
        Value::Ptr(slot) => Ok(slot),
        other => Err(EmulationError::TypeMismatch {
            expected: "managed pointer",
            found: other.kind(),
        }),
    }
}

fn arg_cell(
    frame: &[Rc<RefCell<Value>>],
    index: usize,
) -> Result<&Rc<RefCell<Value>>, EmulationError> {
    frame.get(index).ok_or(EmulationError::ArgumentOutOfBounds {
        index,
        count: frame.len(),
    })
}

fn indexed_local(
    frame: &[Rc<RefCell<Value>>],
    index: usize,
) -> Result<&Rc<RefCell<Value>>, EmulationError> {
    frame.get(index).ok_or(EmulationError::LocalOutOfBounds {
        index,
        count: frame.len(),
    })
}

// The operand carries the local by identity; the frame is indexed by its declared slot.
fn named_local<'a>(
    body: &MethodBody,
    frame: &'a [Rc<RefCell<Value>>],
    operand: &Operand,
    opcode: Opcode,
) -> Result<&'a Rc<RefCell<Value>>, EmulationError> {
    match operand {
        Operand::Local(local) => {
            let index = body
                .local_index(local)
                .ok_or_else(|| EmulationError::UnknownLocal(local.display_name()))?;
            indexed_local(frame, index)
        }
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn argument_index(operand: &Operand, opcode: Opcode) -> Result<usize, EmulationError> {
    match operand {
        Operand::Argument(index) => Ok(usize::from(*index)),
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn branch_target(
    body: &MethodBody,
    operand: &Operand,
    opcode: Opcode,
) -> Result<usize, EmulationError> {
    match operand {
        Operand::Target(target) => body
            .resolve_target(target)
            .ok_or(EmulationError::DanglingBranch),
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn field_operand<'a>(operand: &'a Operand, opcode: Opcode) -> Result<&'a FieldRc, EmulationError> {
    match operand {
        Operand::Field(field) => Ok(field),
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn method_operand<'a>(
    operand: &'a Operand,
    opcode: Opcode,
) -> Result<&'a MethodRc, EmulationError> {
    match operand {
        Operand::Method(method) => Ok(method),
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn type_operand<'a>(
    operand: &'a Operand,
    opcode: Opcode,
) -> Result<&'a CilTypeRc, EmulationError> {
    match operand {
        Operand::Type(ty) => Ok(ty),
        _ => Err(EmulationError::BadOperand(opcode)),
    }
}

fn ordered_branch(opcode: Opcode, a: &Value, b: &Value) -> Result<bool, EmulationError> {
    let unsigned = matches!(
        opcode,
        Opcode::BgeUn
            | Opcode::BgeUnS
            | Opcode::BgtUn
            | Opcode::BgtUnS
            | Opcode::BleUn
            | Opcode::BleUnS
            | Opcode::BltUn
            | Opcode::BltUnS
    );
    // Unordered float operands take no comparison branch.
    let Some(ord) = ordering(a, b, unsigned)? else {
        return Ok(false);
    };
    Ok(match opcode {
        Opcode::Bge | Opcode::BgeS | Opcode::BgeUn | Opcode::BgeUnS => ord != Ordering::Less,
        Opcode::Bgt | Opcode::BgtS | Opcode::BgtUn | Opcode::BgtUnS => ord == Ordering::Greater,
        Opcode::Ble | Opcode::BleS | Opcode::BleUn | Opcode::BleUnS => ord != Ordering::Greater,
        Opcode::Blt | Opcode::BltS | Opcode::BltUn | Opcode::BltUnS => ord == Ordering::Less,
        _ => false,
    })
}

fn ordering(a: &Value, b: &Value, unsigned: bool) -> Result<Option<Ordering>, EmulationError> {
    let ord = match (a, b) {
        (Value::I32(x), Value::I32(y)) => Some(if unsigned {
            (*x as u32).cmp(&(*y as u32))
        } else {
            x.cmp(y)
        }),
        (Value::I64(x), Value::I64(y)) => Some(if unsigned {
            (*x as u64).cmp(&(*y as u64))
        } else {
            x.cmp(y)
        }),
        (Value::F32(x), Value::F32(y)) => x.partial_cmp(y),
        (Value::F64(x), Value::F64(y)) => x.partial_cmp(y),
        _ => {
            return Err(EmulationError::TypeMismatch {
                expected: "matching numeric operands",
                found: b.kind(),
            })
        }
    };
    Ok(ord)
}

fn binary(opcode: Opcode, a: &Value, b: &Value) -> Result<Value, EmulationError> {
    match (a, b) {
        (Value::I32(x), Value::I32(y)) => binary_i32(opcode, *x, *y),
        (Value::I64(x), Value::I64(y)) => binary_i64(opcode, *x, *y),
        (Value::F32(x), Value::F32(y)) => {
            Ok(Value::F32(binary_float(opcode, f64::from(*x), f64::from(*y))? as f32))
        }
        (Value::F64(x), Value::F64(y)) => Ok(Value::F64(binary_float(opcode, *x, *y)?)),
        _ => Err(EmulationError::TypeMismatch {
            expected: "matching numeric operands",
            found: b.kind(),
        }),
    }
}

fn binary_i32(opcode: Opcode, x: i32, y: i32) -> Result<Value, EmulationError> {
    if y == 0 && matches!(opcode, Opcode::Div | Opcode::DivUn | Opcode::Rem | Opcode::RemUn) {
        return Err(EmulationError::DivideByZero);
    }
    let value = match opcode {
        Opcode::Add => x.wrapping_add(y),
        Opcode::Sub => x.wrapping_sub(y),
        Opcode::Mul => x.wrapping_mul(y),
        Opcode::Div => x.wrapping_div(y),
        Opcode::DivUn => ((x as u32) / (y as u32)) as i32,
        Opcode::Rem => x.wrapping_rem(y),
        Opcode::RemUn => ((x as u32) % (y as u32)) as i32,
        Opcode::And => x & y,
        Opcode::Or => x | y,
        Opcode::Xor => x ^ y,
        Opcode::Shl => x.wrapping_shl(y as u32),
        Opcode::Shr => x.wrapping_shr(y as u32),
        Opcode::ShrUn => ((x as u32).wrapping_shr(y as u32)) as i32,
        other => return Err(EmulationError::UnsupportedOpcode(other)),
    };
    Ok(Value::I32(value))
}

fn binary_i64(opcode: Opcode, x: i64, y: i64) -> Result<Value, EmulationError> {
    if y == 0 && matches!(opcode, Opcode::Div | Opcode::DivUn | Opcode::Rem | Opcode::RemUn) {
        return Err(EmulationError::DivideByZero);
    }
    let value = match opcode {
        Opcode::Add => x.wrapping_add(y),
        Opcode::Sub => x.wrapping_sub(y),
        Opcode::Mul => x.wrapping_mul(y),
        Opcode::Div => x.wrapping_div(y),
        Opcode::DivUn => ((x as u64) / (y as u64)) as i64,
        Opcode::Rem => x.wrapping_rem(y),
        Opcode::RemUn => ((x as u64) % (y as u64)) as i64,
        Opcode::And => x & y,
        Opcode::Or => x | y,
        Opcode::Xor => x ^ y,
        Opcode::Shl => x.wrapping_shl(y as u32),
        Opcode::Shr => x.wrapping_shr(y as u32),
        Opcode::ShrUn => ((x as u64).wrapping_shr(y as u32)) as i64,
        other => return Err(EmulationError::UnsupportedOpcode(other)),
    };
    Ok(Value::I64(value))
}

fn binary_float(opcode: Opcode, x: f64, y: f64) -> Result<f64, EmulationError> {
    Ok(match opcode {
        Opcode::Add => x + y,
        Opcode::Sub => x - y,
        Opcode::Mul => x * y,
        Opcode::Div => x / y,
        Opcode::Rem => x % y,
        other => return Err(EmulationError::UnsupportedOpcode(other)),
    })
}

fn unary(opcode: Opcode, value: Value) -> Result<Value, EmulationError> {
    match (opcode, value) {
        (Opcode::Neg, Value::I32(v)) => Ok(Value::I32(v.wrapping_neg())),
        (Opcode::Neg, Value::I64(v)) => Ok(Value::I64(v.wrapping_neg())),
        (Opcode::Neg, Value::F32(v)) => Ok(Value::F32(-v)),
        (Opcode::Neg, Value::F64(v)) => Ok(Value::F64(-v)),
        (Opcode::Not, Value::I32(v)) => Ok(Value::I32(!v)),
        (Opcode::Not, Value::I64(v)) => Ok(Value::I64(!v)),
        (_, other) => Err(EmulationError::TypeMismatch {
            expected: "numeric operand",
            found: other.kind(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::{BodyAssembler, Instruction, InstructionRef};
    use crate::metadata::builder::{FieldBuilder, MethodBuilder, ModuleBuilder, TypeBuilder};
    use crate::metadata::module::ModuleRc;

    fn module() -> ModuleRc {
        ModuleBuilder::new("Sim").build()
    }

    #[test]
    fn arithmetic_flows_through_locals() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let mut asm = BodyAssembler::new();
        let product = asm.local("product", &module.cor.i4);
        asm.ldarg(0)
            .ldarg(1)
            .op(Opcode::Mul)
            .stloc(&product)
            .ldloc(&product)
            .ldarg(2)
            .op(Opcode::Add)
            .ret();
        let method = MethodBuilder::new("MulAdd")
            .static_()
            .param("a", &module.cor.i4)
            .param("b", &module.cor.i4)
            .param("c", &module.cor.i4)
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter
            .invoke(&method, vec![Value::I32(6), Value::I32(7), Value::I32(-2)])
            .expect("evaluate");
        assert_eq!(result, Value::I32(40));
    }

    #[test]
    fn branches_resolve_by_instruction_identity() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let mut asm = BodyAssembler::new();
        let total = asm.local("total", &module.cor.i4);
        let n = asm.local("n", &module.cor.i4);
        asm.ldc_i4(0)
            .stloc(&total)
            .ldarg(0)
            .stloc(&n)
            .label("check")
            .ldloc(&n)
            .branch_to(Opcode::BrfalseS, "done")
            .ldloc(&total)
            .ldloc(&n)
            .op(Opcode::Add)
            .stloc(&total)
            .ldloc(&n)
            .ldc_i4(1)
            .op(Opcode::Sub)
            .stloc(&n)
            .branch_to(Opcode::BrS, "check")
            .label("done")
            .ldloc(&total)
            .ret();
        let method = MethodBuilder::new("SumTo")
            .static_()
            .param("n", &module.cor.i4)
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter
            .invoke(&method, vec![Value::I32(5)])
            .expect("evaluate");
        assert_eq!(result, Value::I32(15));
    }

    #[test]
    fn pointer_stores_reach_the_local_behind_them() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let mut asm = BodyAssembler::new();
        let slot = asm.local("slot", &module.cor.i4);
        asm.ldloca(&slot)
            .ldc_i4(41)
            .stobj(&module.cor.i4)
            .ldloc(&slot)
            .ldc_i4(1)
            .op(Opcode::Add)
            .ret();
        let method = MethodBuilder::new("WriteThrough")
            .static_()
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter.invoke(&method, vec![]).expect("evaluate");
        assert_eq!(result, Value::I32(42));
    }

    #[test]
    fn byref_arguments_alias_the_caller_slot() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let reset = MethodBuilder::new("Reset")
            .static_()
            .param_by_ref("value", &module.cor.i4)
            .implementation(|asm| {
                asm.ldarg(0).ldc_i4(9).stobj(&module.cor.i4).ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut asm = BodyAssembler::new();
        let v = asm.local("v", &module.cor.i4);
        asm.ldc_i4(1)
            .stloc(&v)
            .ldloca(&v)
            .call(&reset)
            .ldloc(&v)
            .ret();
        let caller = MethodBuilder::new("Caller")
            .static_()
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter.invoke(&caller, vec![]).expect("evaluate");
        assert_eq!(result, Value::I32(9));
    }

    #[test]
    fn static_fields_persist_across_invocations() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let counter = FieldBuilder::new("counter", &module.cor.i4)
            .static_()
            .build(&module, &host);
        let method = MethodBuilder::new("Bump")
            .static_()
            .returns(&module.cor.i4)
            .implementation(|asm| {
                asm.ldsfld(&counter)
                    .ldc_i4(1)
                    .op(Opcode::Add)
                    .stsfld(&counter)
                    .ldsfld(&counter)
                    .ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        assert_eq!(
            interpreter.invoke(&method, vec![]).expect("evaluate"),
            Value::I32(1)
        );
        assert_eq!(
            interpreter.invoke(&method, vec![]).expect("evaluate"),
            Value::I32(2)
        );
        assert_eq!(interpreter.static_value(&counter), Value::I32(2));
    }

    #[test]
    fn delegates_dispatch_to_their_captured_target() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let double = MethodBuilder::new("Double")
            .static_()
            .param("value", &module.cor.i4)
            .returns(&module.cor.i4)
            .implementation(|asm| {
                asm.ldarg(0).ldc_i4(2).op(Opcode::Mul).ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let handler = TypeBuilder::class("Sim", "Handler").build(&module);
        let ctor = MethodBuilder::constructor()
            .param("object", &module.cor.object)
            .param("method", &module.cor.int_ptr)
            .build(&module, &handler);
        let invoke = MethodBuilder::new("Invoke")
            .param("value", &module.cor.i4)
            .returns(&module.cor.i4)
            .build(&module, &handler);

        let mut asm = BodyAssembler::new();
        let cell = asm.local("handler", &handler);
        asm.ldnull()
            .ldftn(&double)
            .newobj(&ctor)
            .stloc(&cell)
            .ldloc(&cell)
            .ldc_i4(21)
            .callvirt(&invoke)
            .ret();
        let caller = MethodBuilder::new("Run")
            .static_()
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter.invoke(&caller, vec![]).expect("evaluate");
        assert_eq!(result, Value::I32(42));
    }

    #[test]
    fn constructors_run_against_the_fresh_instance() {
        let module = module();
        let point = TypeBuilder::class("Sim", "Point").build(&module);
        let x = FieldBuilder::new("x", &module.cor.i4).build(&module, &point);
        let ctor = MethodBuilder::constructor()
            .param("x", &module.cor.i4)
            .implementation(|asm| {
                asm.ldarg(0).ldarg(1).stfld(&x).ret();
            })
            .expect("assemble")
            .build(&module, &point);

        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let caller = MethodBuilder::new("Make")
            .static_()
            .returns(&module.cor.i4)
            .implementation(|asm| {
                asm.ldc_i4(7).newobj(&ctor).ldfld(&x).ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter.invoke(&caller, vec![]).expect("evaluate");
        assert_eq!(result, Value::I32(7));
    }

    #[test]
    fn boxing_round_trips_through_object_slots() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let mut asm = BodyAssembler::new();
        let carrier = asm.local("carrier", &module.cor.object);
        asm.ldarg(0)
            .box_value(&module.cor.i4)
            .stloc(&carrier)
            .ldloc(&carrier)
            .unbox_any(&module.cor.i4)
            .ret();
        let method = MethodBuilder::new("RoundTrip")
            .static_()
            .param("value", &module.cor.i4)
            .returns(&module.cor.i4)
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let result = interpreter
            .invoke(&method, vec![Value::I32(11)])
            .expect("evaluate");
        assert_eq!(result, Value::I32(11));
    }

    #[test]
    fn comparisons_produce_condition_flags() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let method = MethodBuilder::new("Greater")
            .static_()
            .param("a", &module.cor.i4)
            .param("b", &module.cor.i4)
            .returns(&module.cor.i4)
            .implementation(|asm| {
                asm.ldarg(0).ldarg(1).op(Opcode::Cgt).ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        assert_eq!(
            interpreter
                .invoke(&method, vec![Value::I32(5), Value::I32(3)])
                .expect("evaluate"),
            Value::I32(1)
        );
        assert_eq!(
            interpreter
                .invoke(&method, vec![Value::I32(3), Value::I32(5)])
                .expect("evaluate"),
            Value::I32(0)
        );
    }

    #[test]
    fn switch_selects_by_index_and_falls_through_out_of_range() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);

        let first = Instruction::ldc_i4(10);
        let first_ret = Instruction::ret();
        let second = Instruction::ldc_i4(20);
        let second_ret = Instruction::ret();
        let jump = Instruction::with_operand(
            Opcode::Switch,
            Operand::Switch(vec![
                InstructionRef::new(&first),
                InstructionRef::new(&second),
            ]),
        );

        let mut body = MethodBody::new();
        body.push(Instruction::ldarg(0));
        body.push(jump);
        body.push(Instruction::ldc_i4(-1));
        body.push(Instruction::ret());
        body.push(first);
        body.push(first_ret);
        body.push(second);
        body.push(second_ret);

        let method = MethodBuilder::new("Pick")
            .static_()
            .param("selector", &module.cor.i4)
            .returns(&module.cor.i4)
            .body(body)
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        for (selector, expected) in [(0, 10), (1, 20), (2, -1), (-7, -1)] {
            let result = interpreter
                .invoke(&method, vec![Value::I32(selector)])
                .expect("evaluate");
            assert_eq!(result, Value::I32(expected));
        }
    }

    #[test]
    fn bodiless_targets_are_rejected() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let stub = MethodBuilder::new("Stub").static_().build(&module, &host);

        let mut interpreter = Interpreter::new();
        let err = interpreter.invoke(&stub, vec![]).unwrap_err();
        assert!(matches!(err, EmulationError::MissingBody(ref name) if name.contains("Stub")));
    }

    #[test]
    fn arity_mismatches_are_rejected() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let method = MethodBuilder::new("One")
            .static_()
            .param("only", &module.cor.i4)
            .implementation(|asm| {
                asm.ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        let err = interpreter.invoke(&method, vec![]).unwrap_err();
        assert!(matches!(
            err,
            EmulationError::ArgumentCountMismatch {
                expected: 1,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn runaway_loops_hit_the_step_budget() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let mut asm = BodyAssembler::new();
        asm.label("spin").branch_to(Opcode::BrS, "spin").ret();
        let spin = MethodBuilder::new("Spin")
            .static_()
            .body(asm.finish().expect("assemble"))
            .build(&module, &host);

        let mut interpreter = Interpreter::with_limits(8, 64);
        let err = interpreter.invoke(&spin, vec![]).unwrap_err();
        assert!(matches!(err, EmulationError::StepLimitExceeded(64)));
    }

    #[test]
    fn runaway_recursion_hits_the_depth_budget() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let recurse = MethodBuilder::new("Recurse").static_().build(&module, &host);
        let mut asm = BodyAssembler::new();
        asm.call(&recurse).ret();
        recurse.set_body(asm.finish().expect("assemble"));

        let mut interpreter = Interpreter::with_limits(8, 1_000);
        let err = interpreter.invoke(&recurse, vec![]).unwrap_err();
        assert!(matches!(err, EmulationError::CallDepthExceeded(8)));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let module = module();
        let host = TypeBuilder::class("Sim", "Host").build(&module);
        let method = MethodBuilder::new("Halve")
            .static_()
            .param("a", &module.cor.i4)
            .param("b", &module.cor.i4)
            .returns(&module.cor.i4)
            .implementation(|asm| {
                asm.ldarg(0).ldarg(1).op(Opcode::Div).ret();
            })
            .expect("assemble")
            .build(&module, &host);

        let mut interpreter = Interpreter::new();
        assert_eq!(
            interpreter
                .invoke(&method, vec![Value::I32(10), Value::I32(2)])
                .expect("evaluate"),
            Value::I32(5)
        );
        let err = interpreter
            .invoke(&method, vec![Value::I32(10), Value::I32(0)])
            .unwrap_err();
        assert!(matches!(err, EmulationError::DivideByZero));
    }
}
