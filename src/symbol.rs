/// Handle the object writer uses to resolve a symbol's final address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Global,
    Static,
    Extern,
    Other,
}

impl StorageClass {
    #[must_use]
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "global" => Some(Self::Global),
            "static" => Some(Self::Static),
            "extern" => Some(Self::Extern),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Opaque type description handed to the type table for interning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TypeRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: SymbolId,
    pub ident: Vec<u8>,
    pub pretty_ident: Option<Vec<u8>>,
    pub class: StorageClass,
    /// Link-once symbol whose defining section may be folded by the linker.
    pub comdat: bool,
    pub no_debug: bool,
    pub ty: TypeRef,
}

impl Symbol {
    #[must_use]
    pub fn new(id: SymbolId, ident: &[u8], class: StorageClass) -> Self {
        Self {
            id,
            ident: ident.to_vec(),
            pretty_ident: None,
            class,
            comdat: false,
            no_debug: false,
            ty: TypeRef::default(),
        }
    }

    /// Name written into debug records.
    #[must_use]
    pub fn display_name(&self) -> &[u8] {
        self.pretty_ident.as_deref().unwrap_or(&self.ident)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Vec<u8>,
    pub line: u32,
}

impl SourcePos {
    #[must_use]
    pub fn new(file: &[u8], line: u32) -> Self {
        Self {
            file: file.to_vec(),
            line,
        }
    }
}
