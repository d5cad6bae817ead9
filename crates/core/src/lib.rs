//! Rill Core: the type system shared across the Rill toolchain
//!
//! The front-end elaborator, the IR middle-end and the code generator all
//! agree on one representation of types. This crate provides it, together
//! with the operations the rest of the toolchain relies on:
//!
//! - `Type`: structural types with named constructors (`Con`) for
//!   definitions, de Bruijn indices for type parameters
//! - `normalize`: head normalisation (unfolding of constructor definitions)
//! - `eq`: structural equality on normalised types, coinductive over
//!   recursive constructors
//! - `typ_id`: the canonical string encoding of a closed normalised type,
//!   used as a monomorphisation key
//! - `Effect`: the two-point suspension lattice (`Triv` < `Await`)
//!
//! # Modules
//!
//! - `types`: everything above

pub mod types;

pub use types::{
    Con, Control, Effect, Field, FuncSort, Kind, Lab, ObjSort, PrimType, SharedSort, Type,
    TypBind, eq, normalize, open, typ_id,
};
