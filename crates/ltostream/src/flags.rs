//! Declarative flag packing.
//!
//! Each record kind lists its boolean and small-enum attributes as an
//! ordered table of [`FlagField`]s. One generic routine packs a table most
//! significant field first into a single word and another unpacks it, so the
//! writer and reader can never disagree on bit positions.

use ltoir::function::FunctionFlags;
use ltoir::{CgraphEdge, CgraphFlags, Layout, StmtFlags, TreeCode, TreeFlags};

/// One packed attribute: its name (for dumps), its width in bits and how to
/// get and set it on the owning struct.
pub struct FlagField<T> {
    pub name: &'static str,
    pub width: u32,
    pub get: fn(&T) -> u64,
    pub set: fn(&mut T, u64),
}

/// Attribute types that can live in a packed field.
pub trait FlagValue: Copy {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

impl FlagValue for bool {
    fn to_bits(self) -> u64 {
        u64::from(self)
    }

    fn from_bits(bits: u64) -> Self {
        bits != 0
    }
}

impl FlagValue for u8 {
    fn to_bits(self) -> u64 {
        u64::from(self)
    }

    fn from_bits(bits: u64) -> Self {
        bits as u8
    }
}

macro_rules! flag_fields {
    (@width) => { 1 };
    (@width $w:literal) => { $w };
    ($ty:ty { $($field:ident $(: $width:literal)?),* $(,)? }) => {
        &[$(
            FlagField::<$ty> {
                name: stringify!($field),
                width: flag_fields!(@width $($width)?),
                get: |v: &$ty| FlagValue::to_bits(v.$field),
                set: |v: &mut $ty, bits| v.$field = FlagValue::from_bits(bits),
            }
        ),*]
    };
}

/// Total width of a field table list.
pub fn width<T>(groups: &[&[FlagField<T>]]) -> u32 {
    groups.iter().flat_map(|g| g.iter()).map(|f| f.width).sum()
}

/// Pack `value`'s attributes, first field in the most significant bits.
pub fn pack<T>(groups: &[&[FlagField<T>]], value: &T) -> u64 {
    debug_assert!(width(groups) <= 60, "flag word too wide");
    let mut word = 0u64;
    for field in groups.iter().flat_map(|g| g.iter()) {
        let mask = (1u64 << field.width) - 1;
        word = (word << field.width) | ((field.get)(value) & mask);
    }
    word
}

/// Inverse of [`pack`]: fields are peeled off the low end, last field first.
pub fn unpack<T>(groups: &[&[FlagField<T>]], mut word: u64, value: &mut T) {
    for field in groups.iter().rev().flat_map(|g| g.iter().rev()) {
        let mask = (1u64 << field.width) - 1;
        (field.set)(value, word & mask);
        word >>= field.width;
    }
}

// ── Tree node attributes ──

pub const COMMON: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    side_effects,
    constant,
    addressable,
    volatile,
    readonly,
    public,
    is_static,
    unsigned,
    nothrow,
    used,
    private,
    protected,
    deprecated,
    asm_written,
});

pub const CONSTANT: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags { overflow });

pub const EXPR: &[FlagField<TreeFlags>] =
    flag_fields!(TreeFlags { no_warning, tail_call, return_slot_opt });

pub const SSA: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    occurs_in_abnormal_phi,
    is_default_def,
    in_free_list,
});

pub const TYPE: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    string_flag,
    no_force_blk,
    needs_constructing,
    transparent_aggr,
    restrict,
    packed,
    user_align,
    nonaliased_component,
    ref_can_alias_all,
});

pub const DECL: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    external,
    artificial,
    ignored,
    nonlocal,
    is_virtual,
    gimple_reg,
    debug_expr_from,
    has_value_expr,
    user_align,
});

/// Declarations with linkage.
pub const VISIBILITY: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    weak,
    comdat,
    common,
    in_text_section,
    hard_register,
    seen_in_bind_expr,
    visibility_specified,
    visibility: 2,
    tls_model: 3,
});

pub const FUNCTION: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags {
    inline,
    declared_inline,
    uninlinable,
    is_malloc,
    pure,
    static_ctor,
    static_dtor,
    no_instrument,
    no_limit_stack,
    possibly_inlined,
    builtin_class: 2,
});

pub const FIELD: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags { bit_field, nonaddressable });

pub const LABEL: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags { forced_label, error_issued });

pub const PARM: &[FlagField<TreeFlags>] = flag_fields!(TreeFlags { by_reference });

/// Attribute tables streamed for nodes of `code`, in packing order.
pub fn tree_groups(code: TreeCode) -> &'static [&'static [FlagField<TreeFlags>]] {
    match code {
        TreeCode::FunctionDecl => &[COMMON, DECL, VISIBILITY, FUNCTION],
        TreeCode::VarDecl => &[COMMON, DECL, VISIBILITY],
        TreeCode::FieldDecl => &[COMMON, DECL, FIELD],
        TreeCode::LabelDecl => &[COMMON, DECL, LABEL],
        TreeCode::ParmDecl | TreeCode::ResultDecl => &[COMMON, DECL, PARM],
        TreeCode::SsaName => &[COMMON, SSA],
        c if c.is_decl() => &[COMMON, DECL],
        c if c.is_type() => &[COMMON, TYPE],
        c if c.is_constant() => &[COMMON, CONSTANT],
        c => match c.layout() {
            Layout::Operands(_) | Layout::Call | Layout::Constructor | Layout::Asm
                if c != TreeCode::ErrorMark =>
            {
                &[COMMON, EXPR]
            }
            _ => &[COMMON],
        },
    }
}

// ── Side-table attributes ──

pub const FUNCTION_BODY: &[FlagField<FunctionFlags>] = flag_fields!(FunctionFlags {
    is_thunk,
    has_local_explicit_reg_vars,
    after_tree_profile,
    returns_pcc_struct,
    returns_struct,
    always_inline_functions_inlined,
    after_inlining,
    dont_save_pending_sizes,
    stdarg,
    has_nonlocal_label,
    calls_alloca,
    calls_setjmp,
    function_frequency: 2,
    va_list_fpr_size: 8,
    va_list_gpr_size: 8,
});

pub const STMT: &[FlagField<StmtFlags>] = flag_fields!(StmtFlags { no_warning, has_volatile_ops });

pub const CGRAPH_NODE: &[FlagField<CgraphFlags>] = flag_fields!(CgraphFlags {
    lowered,
    analyzed,
    needed,
    local,
    externally_visible,
    finalized,
    inlinable,
    disregard_inline_limits,
    redefined_extern_inline,
    for_functions_valid,
    vtable_method,
});

pub const CGRAPH_EDGE: &[FlagField<CgraphEdge>] =
    flag_fields!(CgraphEdge { indirect_call, call_stmt_cannot_inline });

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arbitrary_tree_flags() -> impl Strategy<Value = TreeFlags> {
        (any::<u64>(), any::<u64>()).prop_map(|(a, b)| {
            let mut flags = TreeFlags::default();
            // Spray the raw bits over every table; unpack masks each field.
            unpack(&[COMMON, CONSTANT, EXPR, SSA, TYPE], a, &mut flags);
            unpack(&[DECL, VISIBILITY, FUNCTION, FIELD, LABEL, PARM], b, &mut flags);
            flags
        })
    }

    /// Keep only the attributes `code` streams.
    fn restricted(code: TreeCode, flags: &TreeFlags) -> TreeFlags {
        let groups = tree_groups(code);
        let mut out = TreeFlags::default();
        unpack(groups, pack(groups, flags), &mut out);
        out
    }

    #[test]
    fn test_msb_first_order() {
        let flags = TreeFlags {
            side_effects: true,
            ..TreeFlags::default()
        };
        assert_eq!(pack(&[COMMON], &flags), 1 << 13);
        let flags = TreeFlags {
            asm_written: true,
            ..TreeFlags::default()
        };
        assert_eq!(pack(&[COMMON], &flags), 1);
    }

    #[test]
    fn test_multi_bit_fields() {
        let flags = TreeFlags {
            visibility: ltoir::flags::visibility::HIDDEN,
            tls_model: ltoir::flags::tls_model::LOCAL_EXEC,
            ..TreeFlags::default()
        };
        let word = pack(&[VISIBILITY], &flags);
        assert_eq!(word, (2 << 3) | 6);
        let mut back = TreeFlags::default();
        unpack(&[VISIBILITY], word, &mut back);
        assert_eq!(back, flags);
    }

    #[test]
    fn test_widest_word_leaves_room_for_locus_bits() {
        for &code in TreeCode::ALL {
            assert!(width(tree_groups(code)) <= 60, "{code}");
        }
        assert_eq!(width(&[VISIBILITY]), 12);
        assert_eq!(width(&[FUNCTION]), 12);
    }

    #[test]
    fn test_function_body_flags() {
        let flags = FunctionFlags {
            calls_alloca: true,
            function_frequency: 2,
            va_list_gpr_size: 255,
            ..FunctionFlags::default()
        };
        let mut back = FunctionFlags::default();
        unpack(&[FUNCTION_BODY], pack(&[FUNCTION_BODY], &flags), &mut back);
        assert_eq!(back, flags);
    }

    proptest! {
        #[test]
        fn tree_flags_unpack_inverts_pack(flags in arbitrary_tree_flags(), index in 0..TreeCode::ALL.len()) {
            let code = TreeCode::ALL[index];
            let groups = tree_groups(code);
            let kept = restricted(code, &flags);
            let mut back = TreeFlags::default();
            unpack(groups, pack(groups, &kept), &mut back);
            prop_assert_eq!(back, kept);
        }

        #[test]
        fn cgraph_flags_unpack_inverts_pack(word in 0u64..(1 << 11)) {
            let mut flags = CgraphFlags::default();
            unpack(&[CGRAPH_NODE], word, &mut flags);
            prop_assert_eq!(pack(&[CGRAPH_NODE], &flags), word);
        }

        #[test]
        fn stmt_flags_unpack_inverts_pack(word in 0u64..4) {
            let mut flags = StmtFlags::default();
            unpack(&[STMT], word, &mut flags);
            prop_assert_eq!(pack(&[STMT], &flags), word);
        }
    }
}
