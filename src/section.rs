use crate::{
    CustomSection, DataSegment, Element, Export, FuncType, Global, Import, MemoryType, TableType,
};

#[derive(Debug)]
pub enum Section {
    Custom(CustomSection),
    Type(TypeSection),
    Import(ImportSection),
    Function(FunctionSection),
    Table(TableSection),
    Memory(MemorySection),
    Global(GlobalSection),
    Export(ExportSection),
    Start(u32),
    Element(ElementSection),
    DataCount(u32),
    Code(CodeSection),
    Data(DataSection),
    /// A section id this decoder does not know; its contents were skipped.
    Unknown(u8),
}

impl Section {
    /// Position of a known section in the canonical section order. Custom
    /// and unknown sections may appear anywhere.
    pub fn order(id: u8) -> Option<u8> {
        Some(match id {
            1 => 1,
            2 => 2,
            3 => 3,
            4 => 4,
            5 => 5,
            6 => 6,
            7 => 7,
            8 => 8,
            9 => 9,
            12 => 10,
            10 => 11,
            11 => 12,
            _ => return None,
        })
    }
}

#[derive(Debug)]
pub struct TypeSection {
    pub(crate) fn_types: Vec<FuncType>,
}

#[derive(Debug)]
pub struct ImportSection {
    pub(crate) imports: Vec<Import>,
}

#[derive(Debug)]
pub struct FunctionSection {
    pub(crate) type_idxs: Vec<u32>,
}

#[derive(Debug)]
pub struct TableSection {
    pub(crate) table_types: Vec<TableType>,
}

#[derive(Debug)]
pub struct MemorySection {
    pub(crate) mem_types: Vec<MemoryType>,
}

#[derive(Debug)]
pub struct GlobalSection {
    pub(crate) globals: Vec<Global>,
}

#[derive(Debug)]
pub struct ExportSection {
    pub(crate) exports: Vec<Export>,
}

#[derive(Debug)]
pub struct ElementSection {
    pub(crate) element_segments: Vec<Element>,
}

/// Function bodies before they are paired with their type indices.
#[derive(Debug)]
pub struct CodeSection {
    pub(crate) bodies: Vec<crate::parse::FunctionBody>,
}

#[derive(Debug)]
pub struct DataSection {
    pub(crate) data_segments: Vec<DataSegment>,
}
