//! Stack-machine instruction set for managed method bodies.
//!
//! Operands live inside the opcode variant. Branch operands are [`InstrId`]
//! handles, never byte offsets, so passes may insert, remove, and reorder
//! instructions without invalidating targets. Byte widths only exist for the
//! finalizer's short/long form selection.

use crate::body::{InstrId, LocalId};
use crate::module::{ExtRefId, FieldId, MethodId, Module, TypeSig};
use serde::{Deserialize, Serialize};

/// How control leaves an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Execution continues with the next instruction.
    Next,
    /// A call that returns to the next instruction.
    Call,
    /// Unconditional transfer.
    Branch,
    /// Two-way or multi-way transfer.
    CondBranch,
    /// Leaves the method.
    Return,
    /// Raises an exception.
    Throw,
}

/// One managed instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Nop,

    // Constants.
    LdcI4(i32),
    LdcI4S(i8),
    LdcI8(i64),
    LdcR8(f64),
    LdStr(String),
    LdNull,

    // Locals and arguments.
    Ldloc(LocalId),
    Stloc(LocalId),
    Ldarg(u16),
    Starg(u16),

    // Stack shuffling.
    Dup,
    Pop,

    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    // Bitwise.
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,

    // Comparison.
    Ceq,
    Cgt,
    Clt,

    // Conversion.
    ConvI4,
    ConvI8,
    ConvU1,

    // Unconditional branches, long and short form.
    Br(InstrId),
    BrS(InstrId),
    Leave(InstrId),
    LeaveS(InstrId),

    // Conditional branches.
    Brtrue(InstrId),
    BrtrueS(InstrId),
    Brfalse(InstrId),
    BrfalseS(InstrId),
    Beq(InstrId),
    BneUn(InstrId),
    Bge(InstrId),
    Bgt(InstrId),
    Ble(InstrId),
    Blt(InstrId),
    Switch(Vec<InstrId>),

    // Calls.
    Call(MethodId),
    Callvirt(MethodId),
    Newobj(MethodId),
    CallExt(ExtRefId),

    // Fields.
    Ldfld(FieldId),
    Stfld(FieldId),
    Ldsfld(FieldId),
    Stsfld(FieldId),

    // Byte arrays.
    Newarr,
    Ldlen,
    LdelemU1,
    StelemI1,

    // Terminators.
    Ret,
    Throw,
    Rethrow,
    Endfinally,
}

impl Op {
    /// Flow classification used for basic-block splitting.
    pub fn flow(&self) -> Flow {
        match self {
            Op::Br(_) | Op::BrS(_) | Op::Leave(_) | Op::LeaveS(_) => Flow::Branch,
            Op::Brtrue(_)
            | Op::BrtrueS(_)
            | Op::Brfalse(_)
            | Op::BrfalseS(_)
            | Op::Beq(_)
            | Op::BneUn(_)
            | Op::Bge(_)
            | Op::Bgt(_)
            | Op::Ble(_)
            | Op::Blt(_)
            | Op::Switch(_) => Flow::CondBranch,
            Op::Call(_) | Op::Callvirt(_) | Op::Newobj(_) | Op::CallExt(_) => Flow::Call,
            Op::Ret | Op::Endfinally => Flow::Return,
            Op::Throw | Op::Rethrow => Flow::Throw,
            _ => Flow::Next,
        }
    }

    /// True when the instruction ends a basic block.
    pub fn is_block_ending(&self) -> bool {
        matches!(
            self.flow(),
            Flow::Branch | Flow::CondBranch | Flow::Return | Flow::Throw
        )
    }

    /// True for any branch, conditional or not.
    pub fn is_branch(&self) -> bool {
        matches!(self.flow(), Flow::Branch | Flow::CondBranch)
    }

    /// Encoded width in bytes. Short forms carry an i8 operand, long forms an
    /// i32; two-byte opcodes follow the usual managed encoding.
    pub fn encoded_size(&self) -> usize {
        match self {
            Op::Nop
            | Op::LdNull
            | Op::Dup
            | Op::Pop
            | Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::Neg
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Not
            | Op::Shl
            | Op::Shr
            | Op::ConvI4
            | Op::ConvI8
            | Op::ConvU1
            | Op::Ldlen
            | Op::LdelemU1
            | Op::StelemI1
            | Op::Ret
            | Op::Throw
            | Op::Endfinally => 1,
            Op::Ceq | Op::Cgt | Op::Clt | Op::Rethrow => 2,
            Op::LdcI4S(_) => 2,
            Op::LdcI4(_) => 5,
            Op::LdcI8(_) | Op::LdcR8(_) => 9,
            Op::LdStr(_) => 5,
            Op::Ldloc(_) | Op::Stloc(_) | Op::Ldarg(_) | Op::Starg(_) => 4,
            Op::BrS(_) | Op::LeaveS(_) | Op::BrtrueS(_) | Op::BrfalseS(_) => 2,
            Op::Br(_)
            | Op::Leave(_)
            | Op::Brtrue(_)
            | Op::Brfalse(_)
            | Op::Beq(_)
            | Op::BneUn(_)
            | Op::Bge(_)
            | Op::Bgt(_)
            | Op::Ble(_)
            | Op::Blt(_) => 5,
            Op::Switch(targets) => 1 + 4 + 4 * targets.len(),
            Op::Call(_) | Op::Callvirt(_) | Op::Newobj(_) | Op::CallExt(_) => 5,
            Op::Ldfld(_) | Op::Stfld(_) | Op::Ldsfld(_) | Op::Stsfld(_) => 5,
            Op::Newarr => 5,
        }
    }

    /// Net stack effect (pushes minus pops). Call effects come from the
    /// referenced signature; `Ret` is accounted as zero so injected snippets
    /// can be summed without knowing the enclosing signature.
    pub fn stack_delta(&self, module: &Module) -> i32 {
        match self {
            Op::Nop | Op::Endfinally | Op::Rethrow | Op::Ret => 0,
            Op::LdcI4(_)
            | Op::LdcI4S(_)
            | Op::LdcI8(_)
            | Op::LdcR8(_)
            | Op::LdStr(_)
            | Op::LdNull
            | Op::Ldloc(_)
            | Op::Ldarg(_)
            | Op::Dup
            | Op::Ldsfld(_) => 1,
            Op::Stloc(_) | Op::Starg(_) | Op::Pop | Op::Stsfld(_) | Op::Throw => -1,
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Rem
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::Shr
            | Op::Ceq
            | Op::Cgt
            | Op::Clt => -1,
            Op::Neg | Op::Not | Op::ConvI4 | Op::ConvI8 | Op::ConvU1 => 0,
            Op::Br(_) | Op::BrS(_) | Op::Leave(_) | Op::LeaveS(_) => 0,
            Op::Brtrue(_) | Op::BrtrueS(_) | Op::Brfalse(_) | Op::BrfalseS(_) | Op::Switch(_) => -1,
            Op::Beq(_) | Op::BneUn(_) | Op::Bge(_) | Op::Bgt(_) | Op::Ble(_) | Op::Blt(_) => -2,
            Op::Call(m) | Op::Callvirt(m) => {
                let method = module.method(*m);
                let mut delta = -(method.signature.params.len() as i32);
                if !method.is_static {
                    delta -= 1;
                }
                if method.signature.ret != TypeSig::Void {
                    delta += 1;
                }
                delta
            }
            Op::Newobj(m) => {
                let method = module.method(*m);
                1 - method.signature.params.len() as i32
            }
            Op::CallExt(r) => {
                let ext = module.ext_ref(*r);
                let mut delta = -(ext.params as i32);
                if ext.returns_value {
                    delta += 1;
                }
                delta
            }
            Op::Ldfld(_) => 0,
            Op::Stfld(_) => -2,
            Op::Newarr | Op::Ldlen => 0,
            Op::LdelemU1 => -1,
            Op::StelemI1 => -3,
        }
    }

    /// All branch targets of this instruction, in table order.
    pub fn branch_targets(&self) -> Vec<InstrId> {
        match self {
            Op::Br(t)
            | Op::BrS(t)
            | Op::Leave(t)
            | Op::LeaveS(t)
            | Op::Brtrue(t)
            | Op::BrtrueS(t)
            | Op::Brfalse(t)
            | Op::BrfalseS(t)
            | Op::Beq(t)
            | Op::BneUn(t)
            | Op::Bge(t)
            | Op::Bgt(t)
            | Op::Ble(t)
            | Op::Blt(t) => vec![*t],
            Op::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Redirects every occurrence of `old` to `new`.
    pub fn retarget(&mut self, old: InstrId, new: InstrId) {
        match self {
            Op::Br(t)
            | Op::BrS(t)
            | Op::Leave(t)
            | Op::LeaveS(t)
            | Op::Brtrue(t)
            | Op::BrtrueS(t)
            | Op::Brfalse(t)
            | Op::BrfalseS(t)
            | Op::Beq(t)
            | Op::BneUn(t)
            | Op::Bge(t)
            | Op::Bgt(t)
            | Op::Ble(t)
            | Op::Blt(t) => {
                if *t == old {
                    *t = new;
                }
            }
            Op::Switch(targets) => {
                for t in targets.iter_mut() {
                    if *t == old {
                        *t = new;
                    }
                }
            }
            _ => {}
        }
    }

    /// Canonical long form. Identity for ops without a short variant.
    pub fn to_long_form(self) -> Op {
        match self {
            Op::BrS(t) => Op::Br(t),
            Op::LeaveS(t) => Op::Leave(t),
            Op::BrtrueS(t) => Op::Brtrue(t),
            Op::BrfalseS(t) => Op::Brfalse(t),
            Op::LdcI4S(v) => Op::LdcI4(v as i32),
            other => other,
        }
    }

    /// Short form, when one exists. Branch distance legality is the caller's
    /// concern.
    pub fn to_short_form(&self) -> Option<Op> {
        match self {
            Op::Br(t) => Some(Op::BrS(*t)),
            Op::Leave(t) => Some(Op::LeaveS(*t)),
            Op::Brtrue(t) => Some(Op::BrtrueS(*t)),
            Op::Brfalse(t) => Some(Op::BrfalseS(*t)),
            Op::LdcI4(v) if i8::try_from(*v).is_ok() => Some(Op::LdcI4S(*v as i8)),
            _ => None,
        }
    }

    /// Assembly-style mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::LdcI4(_) => "ldc.i4",
            Op::LdcI4S(_) => "ldc.i4.s",
            Op::LdcI8(_) => "ldc.i8",
            Op::LdcR8(_) => "ldc.r8",
            Op::LdStr(_) => "ldstr",
            Op::LdNull => "ldnull",
            Op::Ldloc(_) => "ldloc",
            Op::Stloc(_) => "stloc",
            Op::Ldarg(_) => "ldarg",
            Op::Starg(_) => "starg",
            Op::Dup => "dup",
            Op::Pop => "pop",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Rem => "rem",
            Op::Neg => "neg",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Not => "not",
            Op::Shl => "shl",
            Op::Shr => "shr",
            Op::Ceq => "ceq",
            Op::Cgt => "cgt",
            Op::Clt => "clt",
            Op::ConvI4 => "conv.i4",
            Op::ConvI8 => "conv.i8",
            Op::ConvU1 => "conv.u1",
            Op::Br(_) => "br",
            Op::BrS(_) => "br.s",
            Op::Leave(_) => "leave",
            Op::LeaveS(_) => "leave.s",
            Op::Brtrue(_) => "brtrue",
            Op::BrtrueS(_) => "brtrue.s",
            Op::Brfalse(_) => "brfalse",
            Op::BrfalseS(_) => "brfalse.s",
            Op::Beq(_) => "beq",
            Op::BneUn(_) => "bne.un",
            Op::Bge(_) => "bge",
            Op::Bgt(_) => "bgt",
            Op::Ble(_) => "ble",
            Op::Blt(_) => "blt",
            Op::Switch(_) => "switch",
            Op::Call(_) => "call",
            Op::Callvirt(_) => "callvirt",
            Op::Newobj(_) => "newobj",
            Op::CallExt(_) => "call.ext",
            Op::Ldfld(_) => "ldfld",
            Op::Stfld(_) => "stfld",
            Op::Ldsfld(_) => "ldsfld",
            Op::Stsfld(_) => "stsfld",
            Op::Newarr => "newarr",
            Op::Ldlen => "ldlen",
            Op::LdelemU1 => "ldelem.u1",
            Op::StelemI1 => "stelem.i1",
            Op::Ret => "ret",
            Op::Throw => "throw",
            Op::Rethrow => "rethrow",
            Op::Endfinally => "endfinally",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::LdcI4(v) => write!(f, "ldc.i4 {v}"),
            Op::LdcI4S(v) => write!(f, "ldc.i4.s {v}"),
            Op::LdcI8(v) => write!(f, "ldc.i8 {v}"),
            Op::LdcR8(v) => write!(f, "ldc.r8 {v}"),
            Op::LdStr(s) => write!(f, "ldstr {s:?}"),
            Op::Ldloc(l) => write!(f, "ldloc {}", l.0),
            Op::Stloc(l) => write!(f, "stloc {}", l.0),
            Op::Ldarg(a) => write!(f, "ldarg {a}"),
            Op::Starg(a) => write!(f, "starg {a}"),
            Op::Switch(targets) => {
                write!(f, "switch [")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "@{}", t.0)?;
                }
                write!(f, "]")
            }
            op => {
                let targets = op.branch_targets();
                if let Some(t) = targets.first() {
                    write!(f, "{} @{}", op.mnemonic(), t.0)
                } else {
                    f.write_str(op.mnemonic())
                }
            }
        }
    }
}
