//! Per-kind field orders for declarations, types and binfos.
//!
//! Each kind streams an ordered list of [`Field`]s. The writer and reader
//! walk the same list, so adding a field to a kind is a one-line change that
//! cannot desynchronize the two directions.

use ltoir::{BinfoData, DeclData, NodeId, TreeCode, TypeData};

pub enum Field<T> {
    /// One child slot.
    Link {
        name: &'static str,
        get: fn(&T) -> Option<NodeId>,
        slot: fn(&mut T) -> &mut Option<NodeId>,
    },
    /// A counted list of child slots.
    Links {
        name: &'static str,
        get: fn(&T) -> &[Option<NodeId>],
        slot: fn(&mut T) -> &mut Vec<Option<NodeId>>,
    },
    /// An unsigned scalar.
    Scalar {
        name: &'static str,
        get: fn(&T) -> u32,
        set: fn(&mut T, u32),
    },
}

impl<T> Field<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Link { name, .. } | Field::Links { name, .. } | Field::Scalar { name, .. } => {
                *name
            }
        }
    }
}

macro_rules! field {
    ($ty:ty, link $f:ident) => {
        Field::<$ty>::Link {
            name: stringify!($f),
            get: |v: &$ty| v.$f,
            slot: |v: &mut $ty| &mut v.$f,
        }
    };
    ($ty:ty, links $f:ident) => {
        Field::<$ty>::Links {
            name: stringify!($f),
            get: |v: &$ty| &v.$f,
            slot: |v: &mut $ty| &mut v.$f,
        }
    };
    ($ty:ty, scalar $f:ident) => {
        Field::<$ty>::Scalar {
            name: stringify!($f),
            get: |v: &$ty| v.$f,
            set: |v: &mut $ty, x| v.$f = x,
        }
    };
}

macro_rules! fields {
    ($ty:ty { $($kind:ident $f:ident),* $(,)? }) => {
        &[$(field!($ty, $kind $f)),*]
    };
}

// ── Declarations ──

const FUNCTION_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link assembler_name,
    link section_name,
    link comdat_group,
    link attributes,
    link abstract_origin,
    link result,
    link personality,
    link vindex,
    scalar builtin_code,
});

const VAR_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link assembler_name,
    link section_name,
    link comdat_group,
    link attributes,
    link abstract_origin,
    link size,
    link size_unit,
    scalar align,
    scalar mode,
    link initial,
    link debug_expr,
    link value_expr,
});

const FIELD_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link size,
    link size_unit,
    scalar align,
    scalar off_align,
    scalar mode,
    link field_offset,
    link bit_field_type,
    link qualifier,
    link bit_offset,
    link field_context,
    link initial,
    link attributes,
    link chain,
});

const PARM_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link size,
    link size_unit,
    scalar align,
    scalar mode,
    link arg_type,
    link chain,
    link attributes,
});

const RESULT_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link size,
    link size_unit,
    scalar align,
    scalar mode,
    link attributes,
});

const TYPE_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link attributes,
    link abstract_origin,
});

const LABEL_DECL: &[Field<DeclData>] = fields!(DeclData { link name, link context });

const CONST_DECL: &[Field<DeclData>] = fields!(DeclData {
    link name,
    link context,
    link initial,
});

const SCOPE_DECL: &[Field<DeclData>] = fields!(DeclData { link name, link context });

pub fn decl_fields(code: TreeCode) -> &'static [Field<DeclData>] {
    match code {
        TreeCode::FunctionDecl => FUNCTION_DECL,
        TreeCode::VarDecl => VAR_DECL,
        TreeCode::FieldDecl => FIELD_DECL,
        TreeCode::ParmDecl => PARM_DECL,
        TreeCode::ResultDecl => RESULT_DECL,
        TreeCode::TypeDecl => TYPE_DECL,
        TreeCode::LabelDecl => LABEL_DECL,
        TreeCode::ConstDecl => CONST_DECL,
        _ => SCOPE_DECL,
    }
}

// ── Types ──

const TYPE_COMMON: &[Field<TypeData>] = fields!(TypeData {
    link name,
    link context,
    link size,
    link size_unit,
    link attributes,
    scalar precision,
    scalar mode,
    scalar align,
    link main_variant,
    link next_variant,
    link canonical,
    link stub_decl,
    link pointer_to,
    link reference_to,
});

/// Integral kinds: bounds.
const TYPE_BOUNDS: &[Field<TypeData>] = fields!(TypeData { link min_value, link max_value });

/// Enumerators, fields, argument types or array domain.
const TYPE_VALUES: &[Field<TypeData>] = fields!(TypeData { link values });

const TYPE_BINFO: &[Field<TypeData>] = fields!(TypeData { link binfo });

pub fn type_fields(code: TreeCode) -> &'static [&'static [Field<TypeData>]] {
    match code {
        TreeCode::IntegerType | TreeCode::BooleanType | TreeCode::RealType => {
            &[TYPE_COMMON, TYPE_BOUNDS]
        }
        TreeCode::EnumeralType => &[TYPE_COMMON, TYPE_BOUNDS, TYPE_VALUES],
        TreeCode::RecordType | TreeCode::UnionType | TreeCode::QualUnionType => {
            &[TYPE_COMMON, TYPE_VALUES, TYPE_BINFO]
        }
        TreeCode::ArrayType | TreeCode::FunctionType | TreeCode::MethodType => {
            &[TYPE_COMMON, TYPE_VALUES]
        }
        _ => &[TYPE_COMMON],
    }
}

// ── Binfos ──

pub const BINFO: &[Field<BinfoData>] = fields!(BinfoData {
    link offset,
    link vtable,
    link virtuals,
    link vptr_field,
    link vtt_subvtt,
    link vtt_vptr,
    links base_accesses,
    links base_binfos,
    link chain,
});
