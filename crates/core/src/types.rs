//! Structural types for Rill
//!
//! Types are structural: two types are equal when their normal forms are
//! equal. Named type definitions are represented by constructors ([`Con`])
//! carrying a definition ([`Kind::Def`]) or an abstract arity
//! ([`Kind::Abs`]); [`normalize`] unfolds definitions at the head and
//! [`eq`] compares coinductively, so recursive definitions terminate.
//!
//! Type parameters use de Bruijn indices: `Var(name, i)` refers to the
//! `i`-th binder counting outward, with every binder group (a function's
//! type-parameter list, a constructor definition's parameter list) binding
//! a consecutive run of indices. The display name is kept for diagnostics
//! only and is never significant.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Field and variant labels
pub type Lab = String;

/// Primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    Bool,
    Nat,
    Int,
    Nat8,
    Nat16,
    Nat32,
    Nat64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Char,
    Text,
    Blob,
    Null,
    Error,
    /// Interface-description placeholder accepting any value
    Reserved,
    /// Interface-description placeholder accepting no value
    Empty,
}

impl PrimType {
    /// The canonical name, used by `typ_id` and by the show pass to pick
    /// prelude functions (`@text_of_<name>`).
    pub fn name(self) -> &'static str {
        match self {
            PrimType::Bool => "Bool",
            PrimType::Nat => "Nat",
            PrimType::Int => "Int",
            PrimType::Nat8 => "Nat8",
            PrimType::Nat16 => "Nat16",
            PrimType::Nat32 => "Nat32",
            PrimType::Nat64 => "Nat64",
            PrimType::Int8 => "Int8",
            PrimType::Int16 => "Int16",
            PrimType::Int32 => "Int32",
            PrimType::Int64 => "Int64",
            PrimType::Float => "Float",
            PrimType::Char => "Char",
            PrimType::Text => "Text",
            PrimType::Blob => "Blob",
            PrimType::Null => "Null",
            PrimType::Error => "Error",
            PrimType::Reserved => "Reserved",
            PrimType::Empty => "Empty",
        }
    }
}

/// Sort of a record-like type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjSort {
    Object,
    Module,
    Actor,
}

/// Sub-sort of shared functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedSort {
    Query,
    Write,
}

/// Sort of a function: local, or remotely callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncSort {
    Local,
    Shared(SharedSort),
}

/// Whether a function returns directly or delivers through a future
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Returns,
    Promises,
}

/// A labelled field of an object or variant type.
///
/// Field lists are kept sorted by label; [`sort_fields`] establishes the
/// invariant and equality relies on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub lab: Lab,
    pub typ: Type,
}

/// A type parameter with its bound
#[derive(Debug, Clone, PartialEq)]
pub struct TypBind {
    pub var: String,
    pub bound: Type,
}

/// Kind of a type constructor
#[derive(Debug, Clone)]
pub enum Kind {
    /// Abstract constructor (opaque to the middle-end)
    Abs(Vec<TypBind>),
    /// Definition: parameters and the defining type, which may mention the
    /// constructor itself
    Def(Vec<TypBind>, Type),
}

struct ConData {
    name: String,
    stamp: u32,
    kind: RefCell<Kind>,
}

/// A named type constructor.
///
/// Identity is the stamp, not the name; two constructors with the same
/// source name are distinct. The kind lives behind a `RefCell` so that
/// recursive definitions can be tied after allocation (`set_kind`).
#[derive(Clone)]
pub struct Con(Rc<ConData>);

static NEXT_CON_STAMP: AtomicU32 = AtomicU32::new(0);

impl Con {
    /// Allocate a fresh constructor with a unique stamp.
    pub fn fresh(name: impl Into<String>, kind: Kind) -> Con {
        Con(Rc::new(ConData {
            name: name.into(),
            stamp: NEXT_CON_STAMP.fetch_add(1, Ordering::Relaxed),
            kind: RefCell::new(kind),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn stamp(&self) -> u32 {
        self.0.stamp
    }

    pub fn kind(&self) -> Kind {
        self.0.kind.borrow().clone()
    }

    /// Replace the kind. Used to close the knot of a recursive definition:
    /// allocate with `Kind::Abs`, build the body mentioning the
    /// constructor, then set the definition.
    pub fn set_kind(&self, kind: Kind) {
        *self.0.kind.borrow_mut() = kind;
    }
}

impl PartialEq for Con {
    fn eq(&self, other: &Con) -> bool {
        self.0.stamp == other.0.stamp
    }
}

impl Eq for Con {}

impl std::hash::Hash for Con {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.stamp.hash(state);
    }
}

impl fmt::Debug for Con {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.name, self.0.stamp)
    }
}

impl fmt::Display for Con {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.name)
    }
}

/// A Rill type
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Prim(PrimType),
    /// Type variable: display name and de Bruijn index
    Var(String, usize),
    /// Constructor application
    Con(Con, Vec<Type>),
    Tup(Vec<Type>),
    /// Array; element type `Mut _` makes the array mutable
    Array(Box<Type>),
    Opt(Box<Type>),
    /// Labelled alternatives, sorted by label
    Variant(Vec<Field>),
    /// Record with a sort, fields sorted by label
    Obj(ObjSort, Vec<Field>),
    Func(FuncSort, Control, Vec<TypBind>, Vec<Type>, Vec<Type>),
    Async(Box<Type>),
    /// Mutable cell; valid only as an array element, object field or
    /// assignment target type
    Mut(Box<Type>),
    Any,
    Non,
}

impl Type {
    pub fn unit() -> Type {
        Type::Tup(Vec::new())
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Tup(ts) if ts.is_empty())
    }

    /// A sequence of types as a single type: one-element sequences are the
    /// element itself, all others a tuple.
    pub fn seq(mut ts: Vec<Type>) -> Type {
        if ts.len() == 1 { ts.remove(0) } else { Type::Tup(ts) }
    }

    /// The inverse of [`Type::seq`]: a tuple is a sequence of its
    /// components, anything else a singleton sequence.
    pub fn as_seq(&self) -> Vec<Type> {
        match self {
            Type::Tup(ts) => ts.clone(),
            t => vec![t.clone()],
        }
    }

    pub fn as_tup(&self) -> &[Type] {
        match self {
            Type::Tup(ts) => ts,
            t => panic!("internal compiler error: expected tuple type, got {}", t),
        }
    }

    pub fn as_opt(&self) -> &Type {
        match self {
            Type::Opt(t) => t,
            t => panic!("internal compiler error: expected option type, got {}", t),
        }
    }

    pub fn as_array(&self) -> &Type {
        match self {
            Type::Array(t) => t,
            t => panic!("internal compiler error: expected array type, got {}", t),
        }
    }

    pub fn as_async(&self) -> &Type {
        match self {
            Type::Async(t) => t,
            t => panic!("internal compiler error: expected async type, got {}", t),
        }
    }

    pub fn as_variant(&self) -> &[Field] {
        match self {
            Type::Variant(fs) => fs,
            t => panic!("internal compiler error: expected variant type, got {}", t),
        }
    }

    pub fn as_obj(&self) -> (ObjSort, &[Field]) {
        match self {
            Type::Obj(s, fs) => (*s, fs),
            t => panic!("internal compiler error: expected object type, got {}", t),
        }
    }

    #[allow(clippy::type_complexity)]
    pub fn as_func(&self) -> (FuncSort, Control, &[TypBind], &[Type], &[Type]) {
        match self {
            Type::Func(s, c, tbs, dom, cod) => (*s, *c, tbs, dom, cod),
            t => panic!("internal compiler error: expected function type, got {}", t),
        }
    }

    pub fn is_mut(&self) -> bool {
        matches!(self, Type::Mut(_))
    }

    /// Strip one level of mutability; identity on immutable types.
    pub fn as_immut(&self) -> &Type {
        match self {
            Type::Mut(t) => t,
            t => t,
        }
    }
}

/// Sort a field list by label, establishing the representation invariant.
pub fn sort_fields(mut fields: Vec<Field>) -> Vec<Field> {
    fields.sort_by(|a, b| a.lab.cmp(&b.lab));
    fields
}

/// Look up a field's type by label.
pub fn lookup_field<'a>(fields: &'a [Field], lab: &str) -> Option<&'a Type> {
    fields.iter().find(|f| f.lab == lab).map(|f| &f.typ)
}

// ============================================================================
//                     SUBSTITUTION AND NORMALISATION
// ============================================================================

/// Shift all free variable indices of `t` at or above `depth` up by `by`.
fn shift_at(depth: usize, by: usize, t: &Type) -> Type {
    match t {
        Type::Var(n, i) => {
            if *i >= depth {
                Type::Var(n.clone(), i + by)
            } else {
                t.clone()
            }
        }
        Type::Prim(_) | Type::Any | Type::Non => t.clone(),
        Type::Con(c, ts) => Type::Con(
            c.clone(),
            ts.iter().map(|t| shift_at(depth, by, t)).collect(),
        ),
        Type::Tup(ts) => Type::Tup(ts.iter().map(|t| shift_at(depth, by, t)).collect()),
        Type::Array(t1) => Type::Array(Box::new(shift_at(depth, by, t1))),
        Type::Opt(t1) => Type::Opt(Box::new(shift_at(depth, by, t1))),
        Type::Async(t1) => Type::Async(Box::new(shift_at(depth, by, t1))),
        Type::Mut(t1) => Type::Mut(Box::new(shift_at(depth, by, t1))),
        Type::Variant(fs) => Type::Variant(shift_fields(depth, by, fs)),
        Type::Obj(s, fs) => Type::Obj(*s, shift_fields(depth, by, fs)),
        Type::Func(s, c, tbs, dom, cod) => {
            let depth = depth + tbs.len();
            Type::Func(
                *s,
                *c,
                tbs.iter()
                    .map(|tb| TypBind {
                        var: tb.var.clone(),
                        bound: shift_at(depth, by, &tb.bound),
                    })
                    .collect(),
                dom.iter().map(|t| shift_at(depth, by, t)).collect(),
                cod.iter().map(|t| shift_at(depth, by, t)).collect(),
            )
        }
    }
}

fn shift_fields(depth: usize, by: usize, fs: &[Field]) -> Vec<Field> {
    fs.iter()
        .map(|f| Field {
            lab: f.lab.clone(),
            typ: shift_at(depth, by, &f.typ),
        })
        .collect()
}

/// Substitute `ts` for the outermost binder group of `t` (indices
/// `0..ts.len()` at depth zero), adjusting the remaining free indices.
pub fn open(ts: &[Type], t: &Type) -> Type {
    if ts.is_empty() {
        return t.clone();
    }
    open_at(0, ts, t)
}

fn open_at(depth: usize, ts: &[Type], t: &Type) -> Type {
    match t {
        Type::Var(n, i) => {
            if *i < depth {
                t.clone()
            } else if *i < depth + ts.len() {
                shift_at(0, depth, &ts[*i - depth])
            } else {
                Type::Var(n.clone(), i - ts.len())
            }
        }
        Type::Prim(_) | Type::Any | Type::Non => t.clone(),
        Type::Con(c, args) => Type::Con(
            c.clone(),
            args.iter().map(|t| open_at(depth, ts, t)).collect(),
        ),
        Type::Tup(tys) => Type::Tup(tys.iter().map(|t| open_at(depth, ts, t)).collect()),
        Type::Array(t1) => Type::Array(Box::new(open_at(depth, ts, t1))),
        Type::Opt(t1) => Type::Opt(Box::new(open_at(depth, ts, t1))),
        Type::Async(t1) => Type::Async(Box::new(open_at(depth, ts, t1))),
        Type::Mut(t1) => Type::Mut(Box::new(open_at(depth, ts, t1))),
        Type::Variant(fs) => Type::Variant(open_fields(depth, ts, fs)),
        Type::Obj(s, fs) => Type::Obj(*s, open_fields(depth, ts, fs)),
        Type::Func(s, c, tbs, dom, cod) => {
            let depth = depth + tbs.len();
            Type::Func(
                *s,
                *c,
                tbs.iter()
                    .map(|tb| TypBind {
                        var: tb.var.clone(),
                        bound: open_at(depth, ts, &tb.bound),
                    })
                    .collect(),
                dom.iter().map(|t| open_at(depth, ts, t)).collect(),
                cod.iter().map(|t| open_at(depth, ts, t)).collect(),
            )
        }
    }
}

fn open_fields(depth: usize, ts: &[Type], fs: &[Field]) -> Vec<Field> {
    fs.iter()
        .map(|f| Field {
            lab: f.lab.clone(),
            typ: open_at(depth, ts, &f.typ),
        })
        .collect()
}

/// Head normalisation: unfold constructor definitions until the head of the
/// type is not a defined constructor. Abstract constructors and every other
/// head are returned as-is (sub-components are not normalised).
pub fn normalize(t: &Type) -> Type {
    match t {
        Type::Con(c, ts) => match c.kind() {
            Kind::Def(tbs, body) => {
                debug_assert_eq!(
                    tbs.len(),
                    ts.len(),
                    "constructor {} applied to {} arguments, expected {}",
                    c,
                    ts.len(),
                    tbs.len()
                );
                normalize(&open(ts, &body))
            }
            Kind::Abs(_) => t.clone(),
        },
        _ => t.clone(),
    }
}

// ============================================================================
//                              EQUALITY
// ============================================================================

/// Structural equality after normalisation, coinductive over recursive
/// constructor definitions.
pub fn eq(t1: &Type, t2: &Type) -> bool {
    eq_typ(t1, t2, &mut HashSet::new())
}

fn eq_typ(t1: &Type, t2: &Type, assum: &mut HashSet<(u32, u32)>) -> bool {
    match (t1, t2) {
        (Type::Con(c1, ts1), Type::Con(c2, ts2)) => {
            if c1 == c2 && eq_all(ts1, ts2, assum) {
                return true;
            }
            // Assume the pair equal while unfolding; a revisit means the
            // definitions are mutually consistent.
            if !assum.insert((c1.stamp(), c2.stamp())) {
                return true;
            }
            match (c1.kind(), c2.kind()) {
                (Kind::Def(_, body), _) => eq_typ(&open(ts1, &body), t2, assum),
                (_, Kind::Def(_, body)) => eq_typ(t1, &open(ts2, &body), assum),
                (Kind::Abs(_), Kind::Abs(_)) => false,
            }
        }
        (Type::Con(c1, ts1), _) => match c1.kind() {
            Kind::Def(_, body) => eq_typ(&open(ts1, &body), t2, assum),
            Kind::Abs(_) => false,
        },
        (_, Type::Con(c2, ts2)) => match c2.kind() {
            Kind::Def(_, body) => eq_typ(t1, &open(ts2, &body), assum),
            Kind::Abs(_) => false,
        },
        (Type::Prim(p1), Type::Prim(p2)) => p1 == p2,
        (Type::Var(_, i), Type::Var(_, j)) => i == j,
        (Type::Tup(ts1), Type::Tup(ts2)) => eq_all(ts1, ts2, assum),
        (Type::Array(a), Type::Array(b))
        | (Type::Opt(a), Type::Opt(b))
        | (Type::Async(a), Type::Async(b))
        | (Type::Mut(a), Type::Mut(b)) => eq_typ(a, b, assum),
        (Type::Variant(fs1), Type::Variant(fs2)) => eq_fields(fs1, fs2, assum),
        (Type::Obj(s1, fs1), Type::Obj(s2, fs2)) => s1 == s2 && eq_fields(fs1, fs2, assum),
        (Type::Func(s1, c1, tbs1, d1, r1), Type::Func(s2, c2, tbs2, d2, r2)) => {
            s1 == s2
                && c1 == c2
                && tbs1.len() == tbs2.len()
                && tbs1
                    .iter()
                    .zip(tbs2)
                    .all(|(a, b)| eq_typ(&a.bound, &b.bound, assum))
                && eq_all(d1, d2, assum)
                && eq_all(r1, r2, assum)
        }
        (Type::Any, Type::Any) | (Type::Non, Type::Non) => true,
        _ => false,
    }
}

fn eq_all(ts1: &[Type], ts2: &[Type], assum: &mut HashSet<(u32, u32)>) -> bool {
    ts1.len() == ts2.len() && ts1.iter().zip(ts2).all(|(a, b)| eq_typ(a, b, assum))
}

fn eq_fields(fs1: &[Field], fs2: &[Field], assum: &mut HashSet<(u32, u32)>) -> bool {
    fs1.len() == fs2.len()
        && fs1
            .iter()
            .zip(fs2)
            .all(|(a, b)| a.lab == b.lab && eq_typ(&a.typ, &b.typ, assum))
}

// ============================================================================
//                             TYPE IDENTIFIERS
// ============================================================================

/// The canonical string encoding of a closed normalised type.
///
/// Injective modulo [`eq`] and terminating on recursive definitions:
/// re-encountering a constructor that is currently being unfolded emits a
/// de Bruijn-style back-reference (`!k` for the `k`-th enclosing unfolding)
/// instead of unfolding again.
///
/// # Panics
///
/// Panics (internal compiler error) when the type contains a free type
/// parameter; identifiers exist only for closed types.
pub fn typ_id(t: &Type) -> String {
    let mut out = String::new();
    typ_id_go(t, &mut Vec::new(), &mut out);
    out
}

fn typ_id_go(t: &Type, opened: &mut Vec<u32>, out: &mut String) {
    use std::fmt::Write;
    match t {
        Type::Var(n, i) => panic!(
            "internal compiler error: typ_id on open type (free parameter {}/{})",
            n, i
        ),
        Type::Con(c, ts) => match c.kind() {
            Kind::Def(_, body) => {
                if let Some(pos) = opened.iter().rposition(|s| *s == c.stamp()) {
                    let _ = write!(out, "!{}", opened.len() - pos);
                } else {
                    opened.push(c.stamp());
                    typ_id_go(&open(ts, &body), opened, out);
                    opened.pop();
                }
            }
            Kind::Abs(_) => {
                let _ = write!(out, "#{}", c.name());
                if !ts.is_empty() {
                    out.push('<');
                    for (k, t1) in ts.iter().enumerate() {
                        if k > 0 {
                            out.push(',');
                        }
                        typ_id_go(t1, opened, out);
                    }
                    out.push('>');
                }
            }
        },
        Type::Prim(p) => out.push_str(p.name()),
        Type::Any => out.push_str("Any"),
        Type::Non => out.push_str("Non"),
        Type::Tup(ts) => {
            out.push('(');
            for (k, t1) in ts.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                typ_id_go(t1, opened, out);
            }
            out.push(')');
        }
        Type::Opt(t1) => {
            out.push('?');
            typ_id_go(t1, opened, out);
        }
        Type::Array(t1) => {
            out.push('[');
            typ_id_go(t1, opened, out);
            out.push(']');
        }
        Type::Mut(t1) => {
            out.push_str("var ");
            typ_id_go(t1, opened, out);
        }
        Type::Async(t1) => {
            out.push_str("async ");
            typ_id_go(t1, opened, out);
        }
        Type::Variant(fs) => {
            out.push('{');
            for (k, f) in fs.iter().enumerate() {
                if k > 0 {
                    out.push(';');
                }
                out.push('#');
                out.push_str(&f.lab);
                out.push(':');
                typ_id_go(&f.typ, opened, out);
            }
            out.push('}');
        }
        Type::Obj(sort, fs) => {
            match sort {
                ObjSort::Object => {}
                ObjSort::Module => out.push_str("module"),
                ObjSort::Actor => out.push_str("actor"),
            }
            out.push('{');
            for (k, f) in fs.iter().enumerate() {
                if k > 0 {
                    out.push(';');
                }
                out.push_str(&f.lab);
                out.push(':');
                typ_id_go(&f.typ, opened, out);
            }
            out.push('}');
        }
        Type::Func(sort, control, tbs, dom, cod) => {
            out.push_str("func");
            match sort {
                FuncSort::Local => {}
                FuncSort::Shared(SharedSort::Write) => out.push_str(" shared"),
                FuncSort::Shared(SharedSort::Query) => out.push_str(" query"),
            }
            if !tbs.is_empty() {
                let _ = write!(out, "<{}>", tbs.len());
            }
            out.push('(');
            for (k, t1) in dom.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                typ_id_go(t1, opened, out);
            }
            out.push(')');
            out.push_str(match control {
                Control::Returns => "->",
                Control::Promises => "->*",
            });
            out.push('(');
            for (k, t1) in cod.iter().enumerate() {
                if k > 0 {
                    out.push(',');
                }
                typ_id_go(t1, opened, out);
            }
            out.push(')');
        }
    }
}

// ============================================================================
//                               DISPLAY
// ============================================================================

impl fmt::Display for Type {
    /// User-facing rendering. Constructors print by name without
    /// unfolding, so recursive types render finitely.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Prim(p) => write!(f, "{}", p.name()),
            Type::Var(n, _) => write!(f, "{}", n),
            Type::Con(c, ts) => {
                write!(f, "{}", c)?;
                if !ts.is_empty() {
                    write!(f, "<")?;
                    for (k, t) in ts.iter().enumerate() {
                        if k > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", t)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Tup(ts) => {
                write!(f, "(")?;
                for (k, t) in ts.iter().enumerate() {
                    if k > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Type::Array(t) => write!(f, "[{}]", t),
            Type::Opt(t) => write!(f, "?{}", t),
            Type::Variant(fs) => {
                write!(f, "{{")?;
                for (k, fld) in fs.iter().enumerate() {
                    if k > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "#{} : {}", fld.lab, fld.typ)?;
                }
                write!(f, "}}")
            }
            Type::Obj(sort, fs) => {
                match sort {
                    ObjSort::Object => {}
                    ObjSort::Module => write!(f, "module ")?,
                    ObjSort::Actor => write!(f, "actor ")?,
                }
                write!(f, "{{")?;
                for (k, fld) in fs.iter().enumerate() {
                    if k > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{} : {}", fld.lab, fld.typ)?;
                }
                write!(f, "}}")
            }
            Type::Func(sort, control, tbs, dom, cod) => {
                match sort {
                    FuncSort::Local => {}
                    FuncSort::Shared(SharedSort::Write) => write!(f, "shared ")?,
                    FuncSort::Shared(SharedSort::Query) => write!(f, "shared query ")?,
                }
                write!(f, "func")?;
                if !tbs.is_empty() {
                    write!(f, "<")?;
                    for (k, tb) in tbs.iter().enumerate() {
                        if k > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", tb.var)?;
                    }
                    write!(f, ">")?;
                }
                write!(f, "(")?;
                for (k, t) in dom.iter().enumerate() {
                    if k > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ") -> ")?;
                if *control == Control::Promises {
                    write!(f, "async ")?;
                }
                match cod.len() {
                    1 => write!(f, "{}", cod[0]),
                    _ => {
                        write!(f, "(")?;
                        for (k, t) in cod.iter().enumerate() {
                            if k > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{}", t)?;
                        }
                        write!(f, ")")
                    }
                }
            }
            Type::Async(t) => write!(f, "async {}", t),
            Type::Mut(t) => write!(f, "var {}", t),
            Type::Any => write!(f, "Any"),
            Type::Non => write!(f, "None"),
        }
    }
}

// ============================================================================
//                               EFFECTS
// ============================================================================

/// The suspension effect of an expression.
///
/// Ordered: `Triv < Await`, so the effect of a compound expression is the
/// `max` of its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Effect {
    /// Evaluation cannot suspend
    Triv,
    /// Evaluation may suspend
    Await,
}

impl Effect {
    /// Least upper bound of two effects.
    pub fn join(self, other: Effect) -> Effect {
        self.max(other)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Triv => write!(f, "triv"),
            Effect::Await => write!(f, "await"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nat() -> Type {
        Type::Prim(PrimType::Nat)
    }

    fn text() -> Type {
        Type::Prim(PrimType::Text)
    }

    #[test]
    fn test_con_stamps_are_unique() {
        let c1 = Con::fresh("T", Kind::Abs(vec![]));
        let c2 = Con::fresh("T", Kind::Abs(vec![]));
        assert_ne!(c1.stamp(), c2.stamp());
        assert_ne!(c1, c2);
        assert_eq!(c1, c1.clone());
    }

    #[test]
    fn test_normalize_unfolds_definition() {
        // type Pair<A> = (A, A)
        let pair = Con::fresh(
            "Pair",
            Kind::Def(
                vec![TypBind {
                    var: "A".to_string(),
                    bound: Type::Any,
                }],
                Type::Tup(vec![Type::Var("A".to_string(), 0), Type::Var("A".to_string(), 0)]),
            ),
        );
        let applied = Type::Con(pair, vec![nat()]);
        assert_eq!(normalize(&applied), Type::Tup(vec![nat(), nat()]));
    }

    #[test]
    fn test_eq_unfolds_definitions() {
        let alias = Con::fresh("MyNat", Kind::Def(vec![], nat()));
        let t = Type::Con(alias, vec![]);
        assert!(eq(&t, &nat()));
        assert!(!eq(&t, &text()));
    }

    #[test]
    fn test_eq_recursive_types() {
        // type List = ?(Nat, List), twice over; the two definitions are
        // structurally equal even though the constructors differ.
        let mk_list = || {
            let c = Con::fresh("List", Kind::Abs(vec![]));
            let body = Type::Opt(Box::new(Type::Tup(vec![
                nat(),
                Type::Con(c.clone(), vec![]),
            ])));
            c.set_kind(Kind::Def(vec![], body));
            Type::Con(c, vec![])
        };
        let l1 = mk_list();
        let l2 = mk_list();
        assert!(eq(&l1, &l2));
        assert!(!eq(&l1, &Type::Opt(Box::new(nat()))));
    }

    #[test]
    fn test_open_substitutes_and_shifts() {
        // Body (A, func<B>(B) -> (A)): A is index 0 outside the inner
        // function and index 1 inside it.
        let body = Type::Tup(vec![
            Type::Var("A".to_string(), 0),
            Type::Func(
                FuncSort::Local,
                Control::Returns,
                vec![TypBind {
                    var: "B".to_string(),
                    bound: Type::Any,
                }],
                vec![Type::Var("B".to_string(), 0)],
                vec![Type::Var("A".to_string(), 1)],
            ),
        ]);
        let opened = open(&[nat()], &body);
        match opened {
            Type::Tup(ts) => {
                assert_eq!(ts[0], nat());
                match &ts[1] {
                    Type::Func(_, _, _, dom, cod) => {
                        assert_eq!(dom[0], Type::Var("B".to_string(), 0));
                        assert_eq!(cod[0], nat());
                    }
                    other => panic!("expected function type, got {:?}", other),
                }
            }
            other => panic!("expected tuple, got {:?}", other),
        }
    }

    #[test]
    fn test_typ_id_primitives_and_structure() {
        assert_eq!(typ_id(&nat()), "Nat");
        assert_eq!(typ_id(&Type::Tup(vec![nat(), text()])), "(Nat,Text)");
        assert_eq!(typ_id(&Type::Opt(Box::new(nat()))), "?Nat");
        assert_eq!(
            typ_id(&Type::Array(Box::new(Type::Mut(Box::new(nat()))))),
            "[var Nat]"
        );
        let variant = Type::Variant(sort_fields(vec![
            Field {
                lab: "ok".to_string(),
                typ: nat(),
            },
            Field {
                lab: "err".to_string(),
                typ: text(),
            },
        ]));
        assert_eq!(typ_id(&variant), "{#err:Text;#ok:Nat}");
    }

    #[test]
    fn test_typ_id_terminates_on_recursion() {
        let c = Con::fresh("List", Kind::Abs(vec![]));
        let body = Type::Opt(Box::new(Type::Tup(vec![
            nat(),
            Type::Con(c.clone(), vec![]),
        ])));
        c.set_kind(Kind::Def(vec![], body));
        let id = typ_id(&Type::Con(c, vec![]));
        assert_eq!(id, "?(Nat,!1)");
    }

    #[test]
    fn test_typ_id_equal_types_equal_ids() {
        let alias = Con::fresh("T", Kind::Def(vec![], Type::Opt(Box::new(nat()))));
        assert_eq!(
            typ_id(&Type::Con(alias, vec![])),
            typ_id(&Type::Opt(Box::new(nat())))
        );
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn test_typ_id_rejects_open_types() {
        typ_id(&Type::Var("A".to_string(), 0));
    }

    #[test]
    fn test_seq_round_trip() {
        assert_eq!(Type::seq(vec![nat()]), nat());
        assert_eq!(Type::seq(vec![]), Type::unit());
        assert_eq!(
            Type::seq(vec![nat(), text()]),
            Type::Tup(vec![nat(), text()])
        );
        assert_eq!(Type::Tup(vec![nat(), text()]).as_seq(), vec![nat(), text()]);
        assert_eq!(nat().as_seq(), vec![nat()]);
    }

    #[test]
    fn test_effect_join() {
        assert_eq!(Effect::Triv.join(Effect::Triv), Effect::Triv);
        assert_eq!(Effect::Triv.join(Effect::Await), Effect::Await);
        assert_eq!(Effect::Await.join(Effect::Triv), Effect::Await);
    }
}
