//! Tree codes: the closed set of node kinds.
//!
//! Every node carries a [`TreeCode`]. The code fixes the node's class, its
//! field layout and, for expression kinds handled mechanically, its operand
//! arity. Codes are dense small integers so a decoder can map a tag byte back
//! to a code through a flat table instead of a chain of comparisons.

/// Coarse grouping of tree codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeClass {
    /// Identifiers, lists, vectors, binfos, SSA names and the error mark.
    Exceptional,
    Constant,
    Type,
    Declaration,
    /// Memory references (`COMPONENT_REF`, `ARRAY_REF`, ...).
    Reference,
    Comparison,
    Unary,
    Binary,
    /// Everything else with operands.
    Expression,
}

/// Field layout of a node kind.
///
/// `Operands(n)` is the mechanical layout: the node is its type, its flags and
/// exactly `n` operand slots. Every other layout has a dedicated field order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Identifier,
    IntegerCst,
    RealCst,
    ComplexCst,
    VectorCst,
    StringCst,
    /// Counted (value, purpose) pairs.
    List,
    /// Counted vector of optional nodes.
    Vec,
    Binfo,
    Type,
    Decl,
    /// Counted (index, value) pairs.
    Constructor,
    /// Callee, static chain, counted arguments.
    Call,
    CaseLabel,
    Asm,
    SsaName,
    Operands(usize),
}

macro_rules! tree_codes {
    ($($variant:ident => $name:literal, $class:ident, $layout:expr;)*) => {
        /// Node kind tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum TreeCode {
            $($variant),*
        }

        impl TreeCode {
            /// Every code, in discriminant order.
            pub const ALL: &'static [TreeCode] = &[$(TreeCode::$variant),*];

            /// Lower-case name as printed in dumps.
            pub fn name(self) -> &'static str {
                match self {
                    $(TreeCode::$variant => $name),*
                }
            }

            pub fn class(self) -> TreeClass {
                match self {
                    $(TreeCode::$variant => TreeClass::$class),*
                }
            }

            pub fn layout(self) -> Layout {
                match self {
                    $(TreeCode::$variant => $layout),*
                }
            }
        }
    };
}

tree_codes! {
    ErrorMark => "error_mark", Exceptional, Layout::Operands(0);
    IdentifierNode => "identifier_node", Exceptional, Layout::Identifier;
    TreeList => "tree_list", Exceptional, Layout::List;
    TreeVec => "tree_vec", Exceptional, Layout::Vec;
    TreeBinfo => "tree_binfo", Exceptional, Layout::Binfo;
    SsaName => "ssa_name", Exceptional, Layout::SsaName;

    IntegerCst => "integer_cst", Constant, Layout::IntegerCst;
    RealCst => "real_cst", Constant, Layout::RealCst;
    ComplexCst => "complex_cst", Constant, Layout::ComplexCst;
    VectorCst => "vector_cst", Constant, Layout::VectorCst;
    StringCst => "string_cst", Constant, Layout::StringCst;

    VoidType => "void_type", Type, Layout::Type;
    IntegerType => "integer_type", Type, Layout::Type;
    RealType => "real_type", Type, Layout::Type;
    BooleanType => "boolean_type", Type, Layout::Type;
    EnumeralType => "enumeral_type", Type, Layout::Type;
    PointerType => "pointer_type", Type, Layout::Type;
    ReferenceType => "reference_type", Type, Layout::Type;
    OffsetType => "offset_type", Type, Layout::Type;
    ComplexType => "complex_type", Type, Layout::Type;
    VectorType => "vector_type", Type, Layout::Type;
    ArrayType => "array_type", Type, Layout::Type;
    RecordType => "record_type", Type, Layout::Type;
    UnionType => "union_type", Type, Layout::Type;
    QualUnionType => "qual_union_type", Type, Layout::Type;
    FunctionType => "function_type", Type, Layout::Type;
    MethodType => "method_type", Type, Layout::Type;

    FunctionDecl => "function_decl", Declaration, Layout::Decl;
    LabelDecl => "label_decl", Declaration, Layout::Decl;
    FieldDecl => "field_decl", Declaration, Layout::Decl;
    VarDecl => "var_decl", Declaration, Layout::Decl;
    ConstDecl => "const_decl", Declaration, Layout::Decl;
    ParmDecl => "parm_decl", Declaration, Layout::Decl;
    TypeDecl => "type_decl", Declaration, Layout::Decl;
    ResultDecl => "result_decl", Declaration, Layout::Decl;
    NamespaceDecl => "namespace_decl", Declaration, Layout::Decl;
    TranslationUnitDecl => "translation_unit_decl", Declaration, Layout::Decl;

    ComponentRef => "component_ref", Reference, Layout::Operands(2);
    BitFieldRef => "bit_field_ref", Reference, Layout::Operands(3);
    IndirectRef => "indirect_ref", Reference, Layout::Operands(1);
    ArrayRef => "array_ref", Reference, Layout::Operands(2);
    ArrayRangeRef => "array_range_ref", Reference, Layout::Operands(2);
    RealpartExpr => "realpart_expr", Reference, Layout::Operands(1);
    ImagpartExpr => "imagpart_expr", Reference, Layout::Operands(1);
    ViewConvertExpr => "view_convert_expr", Reference, Layout::Operands(1);
    ObjTypeRef => "obj_type_ref", Reference, Layout::Operands(3);

    Constructor => "constructor", Expression, Layout::Constructor;
    ModifyExpr => "modify_expr", Expression, Layout::Operands(2);
    InitExpr => "init_expr", Expression, Layout::Operands(2);
    CondExpr => "cond_expr", Expression, Layout::Operands(3);
    CallExpr => "call_expr", Expression, Layout::Call;
    SaveExpr => "save_expr", Expression, Layout::Operands(1);
    AddrExpr => "addr_expr", Expression, Layout::Operands(1);
    LabelExpr => "label_expr", Expression, Layout::Operands(1);
    GotoExpr => "goto_expr", Expression, Layout::Operands(1);
    ReturnExpr => "return_expr", Expression, Layout::Operands(1);
    CaseLabelExpr => "case_label_expr", Expression, Layout::CaseLabel;
    AsmExpr => "asm_expr", Expression, Layout::Asm;
    ExcPtrExpr => "exc_ptr_expr", Expression, Layout::Operands(0);
    FilterExpr => "filter_expr", Expression, Layout::Operands(0);
    WithSizeExpr => "with_size_expr", Expression, Layout::Operands(2);
    TruthAndifExpr => "truth_andif_expr", Expression, Layout::Operands(2);
    TruthOrifExpr => "truth_orif_expr", Expression, Layout::Operands(2);

    PlusExpr => "plus_expr", Binary, Layout::Operands(2);
    MinusExpr => "minus_expr", Binary, Layout::Operands(2);
    MultExpr => "mult_expr", Binary, Layout::Operands(2);
    PointerPlusExpr => "pointer_plus_expr", Binary, Layout::Operands(2);
    TruncDivExpr => "trunc_div_expr", Binary, Layout::Operands(2);
    CeilDivExpr => "ceil_div_expr", Binary, Layout::Operands(2);
    FloorDivExpr => "floor_div_expr", Binary, Layout::Operands(2);
    RoundDivExpr => "round_div_expr", Binary, Layout::Operands(2);
    TruncModExpr => "trunc_mod_expr", Binary, Layout::Operands(2);
    CeilModExpr => "ceil_mod_expr", Binary, Layout::Operands(2);
    FloorModExpr => "floor_mod_expr", Binary, Layout::Operands(2);
    RoundModExpr => "round_mod_expr", Binary, Layout::Operands(2);
    RdivExpr => "rdiv_expr", Binary, Layout::Operands(2);
    ExactDivExpr => "exact_div_expr", Binary, Layout::Operands(2);
    MinExpr => "min_expr", Binary, Layout::Operands(2);
    MaxExpr => "max_expr", Binary, Layout::Operands(2);
    LshiftExpr => "lshift_expr", Binary, Layout::Operands(2);
    RshiftExpr => "rshift_expr", Binary, Layout::Operands(2);
    LrotateExpr => "lrotate_expr", Binary, Layout::Operands(2);
    RrotateExpr => "rrotate_expr", Binary, Layout::Operands(2);
    BitIorExpr => "bit_ior_expr", Binary, Layout::Operands(2);
    BitXorExpr => "bit_xor_expr", Binary, Layout::Operands(2);
    BitAndExpr => "bit_and_expr", Binary, Layout::Operands(2);
    TruthAndExpr => "truth_and_expr", Binary, Layout::Operands(2);
    TruthOrExpr => "truth_or_expr", Binary, Layout::Operands(2);
    TruthXorExpr => "truth_xor_expr", Binary, Layout::Operands(2);
    ComplexExpr => "complex_expr", Binary, Layout::Operands(2);
    RangeExpr => "range_expr", Binary, Layout::Operands(2);

    FixTruncExpr => "fix_trunc_expr", Unary, Layout::Operands(1);
    FloatExpr => "float_expr", Unary, Layout::Operands(1);
    NegateExpr => "negate_expr", Unary, Layout::Operands(1);
    AbsExpr => "abs_expr", Unary, Layout::Operands(1);
    BitNotExpr => "bit_not_expr", Unary, Layout::Operands(1);
    TruthNotExpr => "truth_not_expr", Unary, Layout::Operands(1);
    ConvertExpr => "convert_expr", Unary, Layout::Operands(1);
    NopExpr => "nop_expr", Unary, Layout::Operands(1);
    NonLvalueExpr => "non_lvalue_expr", Unary, Layout::Operands(1);
    ConjExpr => "conj_expr", Unary, Layout::Operands(1);

    LtExpr => "lt_expr", Comparison, Layout::Operands(2);
    LeExpr => "le_expr", Comparison, Layout::Operands(2);
    GtExpr => "gt_expr", Comparison, Layout::Operands(2);
    GeExpr => "ge_expr", Comparison, Layout::Operands(2);
    EqExpr => "eq_expr", Comparison, Layout::Operands(2);
    NeExpr => "ne_expr", Comparison, Layout::Operands(2);
    UnorderedExpr => "unordered_expr", Comparison, Layout::Operands(2);
    OrderedExpr => "ordered_expr", Comparison, Layout::Operands(2);
    UnltExpr => "unlt_expr", Comparison, Layout::Operands(2);
    UnleExpr => "unle_expr", Comparison, Layout::Operands(2);
    UngtExpr => "ungt_expr", Comparison, Layout::Operands(2);
    UngeExpr => "unge_expr", Comparison, Layout::Operands(2);
    UneqExpr => "uneq_expr", Comparison, Layout::Operands(2);
    LtgtExpr => "ltgt_expr", Comparison, Layout::Operands(2);
}

/// Dense code lookup indexed by discriminant.
const CODE_TABLE: [Option<TreeCode>; 256] = {
    let mut table = [None; 256];
    let mut i = 0;
    while i < TreeCode::ALL.len() {
        table[TreeCode::ALL[i] as usize] = Some(TreeCode::ALL[i]);
        i += 1;
    }
    table
};

impl TreeCode {
    /// Map a raw discriminant back to a code.
    pub fn from_u8(raw: u8) -> Option<TreeCode> {
        CODE_TABLE[raw as usize]
    }

    pub fn is_type(self) -> bool {
        self.class() == TreeClass::Type
    }

    pub fn is_decl(self) -> bool {
        self.class() == TreeClass::Declaration
    }

    pub fn is_constant(self) -> bool {
        self.class() == TreeClass::Constant
    }

    /// Kinds that take part in back-referencing: types, declarations and binfos.
    pub fn is_global_indexable(self) -> bool {
        self.is_type() || self.is_decl() || self == TreeCode::TreeBinfo
    }

    /// Whether the node's own type reference is part of its record.
    pub fn streams_type(self) -> bool {
        !matches!(
            self.layout(),
            Layout::Identifier | Layout::List | Layout::Vec | Layout::CaseLabel | Layout::SsaName
        )
    }

    /// Operand count for mechanically laid out kinds.
    pub fn arity(self) -> Option<usize> {
        match self.layout() {
            Layout::Operands(n) => Some(n),
            _ => None,
        }
    }
}

impl std::fmt::Display for TreeCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_dense() {
        for (i, code) in TreeCode::ALL.iter().enumerate() {
            assert_eq!(*code as usize, i);
            assert_eq!(TreeCode::from_u8(i as u8), Some(*code));
        }
        assert_eq!(TreeCode::from_u8(TreeCode::ALL.len() as u8), None);
    }

    #[test]
    fn test_code_space_fits_tag_byte() {
        // Tree tags start at 64 in the stream.
        assert!(TreeCode::ALL.len() < 192);
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = TreeCode::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), TreeCode::ALL.len());
    }

    #[test]
    fn test_global_indexable_kinds() {
        assert!(TreeCode::RecordType.is_global_indexable());
        assert!(TreeCode::VarDecl.is_global_indexable());
        assert!(TreeCode::TreeBinfo.is_global_indexable());
        assert!(!TreeCode::PlusExpr.is_global_indexable());
        assert!(!TreeCode::IntegerCst.is_global_indexable());
    }

    #[test]
    fn test_arity() {
        assert_eq!(TreeCode::PlusExpr.arity(), Some(2));
        assert_eq!(TreeCode::CondExpr.arity(), Some(3));
        assert_eq!(TreeCode::NegateExpr.arity(), Some(1));
        assert_eq!(TreeCode::ExcPtrExpr.arity(), Some(0));
        assert_eq!(TreeCode::CallExpr.arity(), None);
    }

    #[test]
    fn test_streams_type() {
        assert!(TreeCode::PlusExpr.streams_type());
        assert!(TreeCode::VarDecl.streams_type());
        assert!(!TreeCode::IdentifierNode.streams_type());
        assert!(!TreeCode::TreeList.streams_type());
    }
}
