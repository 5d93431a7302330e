//! The per-symbol data that we read from an IR object's symbol table, report to the linker and
//! later get resolutions back for.

use std::ffi::CString;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Def = 0,
    WeakDef = 1,
    Undef = 2,
    WeakUndef = 3,
    Common = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Default = 0,
    Protected = 1,
    Internal = 2,
    Hidden = 3,
}

/// The linker's decision about a symbol, filled in once all input files have been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Unknown = 0,
    Undef,
    PrevailingDef,
    PrevailingDefIronly,
    PreemptedReg,
    PreemptedIr,
    ResolvedIr,
    ResolvedExec,
    ResolvedDyn,
    PrevailingDefIronlyExp,
}

/// An identifier assigned to a symbol by the compiler that produced the IR. It has no meaning to
/// us other than allowing the backend to match our resolutions to its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    pub name: CString,
    pub comdat_key: Option<CString>,
    pub kind: SymbolKind,
    pub visibility: Visibility,
    pub size: u64,
    pub resolution: Resolution,
}

impl SymbolKind {
    #[must_use]
    pub fn from_code(code: u8) -> Option<SymbolKind> {
        match code {
            0 => Some(SymbolKind::Def),
            1 => Some(SymbolKind::WeakDef),
            2 => Some(SymbolKind::Undef),
            3 => Some(SymbolKind::WeakUndef),
            4 => Some(SymbolKind::Common),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_definition(self) -> bool {
        matches!(
            self,
            SymbolKind::Def | SymbolKind::WeakDef | SymbolKind::Common
        )
    }
}

impl Visibility {
    #[must_use]
    pub fn from_code(code: u8) -> Option<Visibility> {
        match code {
            0 => Some(Visibility::Default),
            1 => Some(Visibility::Protected),
            2 => Some(Visibility::Internal),
            3 => Some(Visibility::Hidden),
            _ => None,
        }
    }
}

impl Resolution {
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Resolution> {
        match raw {
            0 => Some(Resolution::Unknown),
            1 => Some(Resolution::Undef),
            2 => Some(Resolution::PrevailingDef),
            3 => Some(Resolution::PrevailingDefIronly),
            4 => Some(Resolution::PreemptedReg),
            5 => Some(Resolution::PreemptedIr),
            6 => Some(Resolution::ResolvedIr),
            7 => Some(Resolution::ResolvedExec),
            8 => Some(Resolution::ResolvedDyn),
            9 => Some(Resolution::PrevailingDefIronlyExp),
            _ => None,
        }
    }

    /// The name that the backend expects to see in the resolution file.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Resolution::Unknown => "UNKNOWN",
            Resolution::Undef => "UNDEF",
            Resolution::PrevailingDef => "PREVAILING_DEF",
            Resolution::PrevailingDefIronly => "PREVAILING_DEF_IRONLY",
            Resolution::PreemptedReg => "PREEMPTED_REG",
            Resolution::PreemptedIr => "PREEMPTED_IR",
            Resolution::ResolvedIr => "RESOLVED_IR",
            Resolution::ResolvedExec => "RESOLVED_EXEC",
            Resolution::ResolvedDyn => "RESOLVED_DYN",
            Resolution::PrevailingDefIronlyExp => "PREVAILING_DEF_IRONLY_EXP",
        }
    }
}

impl SymbolRecord {
    /// Creates a record as it would look straight after decoding, with an unknown resolution.
    #[must_use]
    pub fn new(
        name: CString,
        comdat_key: Option<CString>,
        kind: SymbolKind,
        visibility: Visibility,
        size: u64,
    ) -> Self {
        Self {
            name,
            comdat_key,
            kind,
            visibility,
            size,
            resolution: Resolution::Unknown,
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self.name(), f)
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Display for SymbolRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "`{}` {:?}", self.name.to_string_lossy(), self.kind)?;
        if let Some(key) = self.comdat_key.as_ref() {
            write!(f, " comdat=`{}`", key.to_string_lossy())?;
        }
        Ok(())
    }
}
