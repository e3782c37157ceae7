//! umbra-core: the metadata graph, instruction IR, codec boundary, and
//! seeded randomness shared by every protection pass.

pub mod body;
pub mod io;
pub mod module;
pub mod op;
pub mod result;
pub mod seed;

pub use body::{ExceptionRegion, InstrId, Instruction, Local, LocalId, MethodBody, RegionKind};
pub use io::{JsonModuleIo, ModuleIo};
pub use module::{
    CustomAttribute, EventDef, EventId, ExtRefId, ExternalRef, FieldDef, FieldId, MethodDef,
    MethodId, Module, PropertyDef, PropertyId, Signature, TypeDef, TypeId, TypeSig, Visibility,
    GLOBAL_TYPE_NAME,
};
pub use op::{Flow, Op};
pub use result::{Error, Result};
pub use seed::{Rand, Seed};
