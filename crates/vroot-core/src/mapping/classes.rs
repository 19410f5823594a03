//! Interface classes: which kind of filesystem operation is being mapped

bitflags::bitflags! {
    /// Bitmask categorizing the intercepted call.
    ///
    /// Rules carry a mask of the classes they apply to; a rule participates
    /// in matching only if its mask intersects the call's class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InterfaceClass: u32 {
        const OPEN          = 1 << 0;
        const STAT          = 1 << 1;
        const ACCESS        = 1 << 2;
        const CREAT         = 1 << 3;
        const MKNOD         = 1 << 4;
        const SYMLINK       = 1 << 5;
        const RENAME        = 1 << 6;
        const REMOVE        = 1 << 7;
        /// chdir(), fchdir(): the result carries the new virtual cwd
        const CHDIR         = 1 << 8;
        const EXEC          = 1 << 9;
        const CHROOT        = 1 << 10;
        const GETCWD        = 1 << 11;
        const SET_TIMES     = 1 << 12;
        const SET_FILE_INFO = 1 << 13;
        const L10N          = 1 << 14;
        const PROC_FS_OP    = 1 << 15;
        const MOUNT         = 1 << 16;
        const XATTR         = 1 << 17;
        const SOCKADDR      = 1 << 18;
        const FTSOPEN       = 1 << 19;
        const GLOB          = 1 << 20;
        const REALPATH      = 1 << 21;
        const DLOPEN        = 1 << 22;
    }
}

/// Classes of the libc functions a preload layer intercepts
const FUNCTION_CLASSES: &[(InterfaceClass, &[&str])] = &[
    (
        InterfaceClass::OPEN,
        &["open", "open64", "openat", "openat64", "__open_2", "fopen", "fopen64", "freopen",
          "freopen64", "opendir", "truncate", "truncate64"],
    ),
    (
        InterfaceClass::OPEN.union(InterfaceClass::CREAT),
        &["creat", "creat64"],
    ),
    (InterfaceClass::CREAT, &["mkdir", "mkdirat"]),
    (
        InterfaceClass::STAT,
        &["stat", "stat64", "lstat", "lstat64", "fstatat", "fstatat64", "__xstat", "__lxstat",
          "statx", "statfs", "statvfs", "readlink", "readlinkat"],
    ),
    (InterfaceClass::ACCESS, &["access", "faccessat", "euidaccess", "eaccess"]),
    (InterfaceClass::MKNOD, &["mknod", "mknodat", "mkfifo", "mkfifoat"]),
    (InterfaceClass::SYMLINK, &["symlink", "symlinkat", "link", "linkat"]),
    (InterfaceClass::RENAME, &["rename", "renameat", "renameat2"]),
    (InterfaceClass::REMOVE, &["unlink", "unlinkat", "rmdir", "remove"]),
    (InterfaceClass::CHDIR, &["chdir"]),
    (
        InterfaceClass::EXEC,
        &["execve", "execv", "execvp", "execvpe", "execl", "execlp", "execle", "posix_spawn",
          "posix_spawnp"],
    ),
    (InterfaceClass::CHROOT, &["chroot"]),
    (InterfaceClass::GETCWD, &["getcwd", "getwd", "get_current_dir_name"]),
    (InterfaceClass::SET_TIMES, &["utime", "utimes", "lutimes", "utimensat", "futimesat"]),
    (InterfaceClass::SET_FILE_INFO, &["chmod", "fchmodat", "chown", "lchown", "fchownat"]),
    (
        InterfaceClass::XATTR,
        &["getxattr", "lgetxattr", "setxattr", "lsetxattr", "listxattr", "llistxattr",
          "removexattr", "lremovexattr"],
    ),
    (InterfaceClass::MOUNT, &["mount", "umount", "umount2"]),
    (InterfaceClass::SOCKADDR, &["bind", "connect"]),
    (InterfaceClass::FTSOPEN, &["fts_open"]),
    (InterfaceClass::GLOB, &["glob", "glob64"]),
    (InterfaceClass::REALPATH, &["realpath", "__realpath_chk", "canonicalize_file_name"]),
    (InterfaceClass::DLOPEN, &["dlopen", "dlmopen"]),
];

impl InterfaceClass {
    /// Class of an intercepted function by name, e.g. `"execve"` -> `EXEC`
    pub fn for_function(func_name: &str) -> Option<Self> {
        FUNCTION_CLASSES
            .iter()
            .find(|(_, names)| names.contains(&func_name))
            .map(|(class, _)| *class)
    }

    /// Look up a class by its lowercase name, e.g. `"set_file_info"`
    pub fn from_lowercase_name(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }

    /// Parse a list of class names; an empty list means every class.
    ///
    /// Fails with the first name that is not a class.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Self, &str> {
        if names.is_empty() {
            return Ok(Self::all());
        }
        let mut classes = Self::empty();
        for name in names {
            let name = name.as_ref();
            if name == "all" {
                classes |= Self::all();
                continue;
            }
            classes |= Self::from_lowercase_name(name).ok_or(name)?;
        }
        Ok(classes)
    }

    /// Lowercase names of the set bits, joined with `,`
    pub fn names(&self) -> String {
        if *self == Self::all() {
            return "all".to_string();
        }
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(",")
    }
}
