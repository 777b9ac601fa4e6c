use crate::intern::UsrId;
use crate::location::Location;
use crate::parse::EntityKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a stored location points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    Invalid,
    Class,
    ClassForwardDecl,
    Struct,
    StructForwardDecl,
    Union,
    Enum,
    EnumValue,
    Namespace,
    Field,
    Variable,
    MemberFunctionDecl,
    MemberFunctionDef,
    MethodDecl,
    MethodDef,
    Reference,
}

impl CursorKind {
    /// Maps a parser entity kind and its definition flag onto the stored
    /// kind. Entities the database does not track map to `Invalid`.
    pub fn from_entity(kind: EntityKind, is_definition: bool) -> CursorKind {
        match kind {
            EntityKind::Class => {
                if is_definition {
                    CursorKind::Class
                } else {
                    CursorKind::ClassForwardDecl
                }
            }
            EntityKind::Struct => {
                if is_definition {
                    CursorKind::Struct
                } else {
                    CursorKind::StructForwardDecl
                }
            }
            EntityKind::Union => CursorKind::Union,
            EntityKind::Enum => CursorKind::Enum,
            EntityKind::EnumConstant => CursorKind::EnumValue,
            EntityKind::Namespace => CursorKind::Namespace,
            EntityKind::Variable | EntityKind::StaticVariable => CursorKind::Variable,
            EntityKind::Field => CursorKind::Field,
            EntityKind::Function => {
                if is_definition {
                    CursorKind::MethodDef
                } else {
                    CursorKind::MethodDecl
                }
            }
            EntityKind::InstanceMethod
            | EntityKind::StaticMethod
            | EntityKind::Constructor
            | EntityKind::Destructor => {
                if is_definition {
                    CursorKind::MemberFunctionDef
                } else {
                    CursorKind::MemberFunctionDecl
                }
            }
            _ => CursorKind::Invalid,
        }
    }

    pub fn is_definition(self) -> bool {
        matches!(
            self,
            CursorKind::Class
                | CursorKind::Struct
                | CursorKind::Union
                | CursorKind::Enum
                | CursorKind::EnumValue
                | CursorKind::Namespace
                | CursorKind::Field
                | CursorKind::Variable
                | CursorKind::MemberFunctionDef
                | CursorKind::MethodDef
        )
    }
}

/// Per-location record: which symbol starts here, what it is, and the byte
/// span of its spelled name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub usr: UsrId,
    pub kind: CursorKind,
    pub start: u32,
    pub end: u32,
}

impl CursorInfo {
    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A compiler-suggested replacement for a byte range of a file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixIt {
    pub start: u32,
    pub end: u32,
    pub text: String,
}

/// Query result: a resolved cursor with its navigation target.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub location: Location,
    pub kind: Option<CursorKind>,
    pub symbol_name: String,
    pub target: Option<Location>,
    pub start: u32,
    pub end: u32,
}

impl Cursor {
    pub fn is_empty(&self) -> bool {
        !self.location.is_valid()
    }
}

/// One way of compiling a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub compiler: PathBuf,
    pub args: Vec<String>,
    pub defines: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
}

impl Build {
    pub fn new(compiler: PathBuf, args: Vec<String>) -> Self {
        Self {
            compiler,
            args,
            ..Default::default()
        }
    }
}

/// Everything needed to (re)index one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInformation {
    pub source_file: PathBuf,
    /// Epoch seconds of the last successful parse, 0 when never parsed.
    pub parsed: u64,
    pub builds: Vec<Build>,
}

impl SourceInformation {
    pub fn new(source_file: PathBuf) -> Self {
        Self {
            source_file,
            parsed: 0,
            builds: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.source_file.as_os_str().is_empty()
    }
}

// Two source infos describe the same compilation when file and builds agree;
// the parse timestamp is bookkeeping and excluded on purpose so an unchanged
// request reparses instead of parsing fresh.
impl PartialEq for SourceInformation {
    fn eq(&self, other: &Self) -> bool {
        self.source_file == other.source_file && self.builds == other.builds
    }
}

impl Eq for SourceInformation {}

/// Pattern matching source paths for reindex/remove requests.
#[derive(Debug, Clone)]
pub enum Match {
    /// Matches everything.
    Any,
    /// Matches one exact path.
    Path(PathBuf),
    /// Matches paths containing the needle.
    Substring(String),
    Regex(regex::Regex),
}

impl Match {
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Match::Any => true,
            Match::Path(p) => path == p,
            Match::Substring(needle) => path.to_string_lossy().contains(needle.as_str()),
            Match::Regex(re) => re.is_match(&path.to_string_lossy()),
        }
    }
}

/// Flags for the references query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFlags {
    /// Also emit declarations of every virtual sibling of the target.
    pub find_virtuals: bool,
    /// Emit both references and declarations for the target.
    pub all_references: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyMode {
    /// Files that depend on the argument.
    DependsOnArg,
    /// Files the argument depends on.
    ArgDependsOn,
}

/// Line-based client connection; the socket protocol behind it lives
/// outside this crate.
pub trait Connection: Send {
    fn write(&mut self, message: &str);
}

impl Connection for Vec<String> {
    fn write(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_mapping() {
        assert_eq!(
            CursorKind::from_entity(EntityKind::Class, true),
            CursorKind::Class
        );
        assert_eq!(
            CursorKind::from_entity(EntityKind::Class, false),
            CursorKind::ClassForwardDecl
        );
        assert_eq!(
            CursorKind::from_entity(EntityKind::Function, false),
            CursorKind::MethodDecl
        );
        assert_eq!(
            CursorKind::from_entity(EntityKind::Constructor, true),
            CursorKind::MemberFunctionDef
        );
        assert_eq!(
            CursorKind::from_entity(EntityKind::Typedef, true),
            CursorKind::Invalid
        );
    }

    #[test]
    fn source_information_equality_ignores_parse_time() {
        let mut a = SourceInformation::new(PathBuf::from("/tmp/a.cpp"));
        a.builds
            .push(Build::new(PathBuf::from("/usr/bin/cc"), vec!["-O2".into()]));
        let mut b = a.clone();
        b.parsed = 12345;
        assert_eq!(a, b);

        b.builds[0].args.push("-g".into());
        assert_ne!(a, b);
    }

    #[test]
    fn match_variants() {
        let p = Path::new("/src/lib/foo.cpp");
        assert!(Match::Any.matches(p));
        assert!(Match::Path(PathBuf::from("/src/lib/foo.cpp")).matches(p));
        assert!(Match::Substring("lib".into()).matches(p));
        assert!(!Match::Substring("bar".into()).matches(p));
        assert!(Match::Regex(regex::Regex::new(r"foo\.cpp$").unwrap()).matches(p));
    }
}
