use std::{borrow::Cow, fmt, time::Instant};

/// Place in the code where a value was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeLocation {
    pub function: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.function, self.file, self.line)
    }
}

/// Human readable description attached to devices, surfaces and render graphs so that log
/// messages can name them.
#[derive(Default, Debug, Clone)]
pub struct DebugInfo {
    pub name: Option<Cow<'static, str>>,
    pub location: Option<CodeLocation>,
    pub created_instant: Option<Instant>,
}

impl DebugInfo {
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_location(mut self, location: CodeLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_created_now(mut self) -> Self {
        self.created_instant = Some(Instant::now());
        self
    }

    /// Returns the name or `"unnamed"`
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

impl fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "\"{}\" declared in {}", self.name(), location),
            None => write!(f, "\"{}\"", self.name()),
        }
    }
}

/// Name of the function this macro is called in
#[macro_export]
macro_rules! function_name {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f);
        &name[..name.len() - 3]
    }};
}

#[macro_export]
macro_rules! code_location {
    () => {
        $crate::CodeLocation {
            function: $crate::function_name!(),
            file: file!(),
            line: line!(),
        }
    };
}

/// Creates a [`DebugInfo`] with the given name that remembers where it was created
#[macro_export]
macro_rules! debug_info {
    ($name:literal) => {
        $crate::DebugInfo::default()
            .with_name($name)
            .with_location($crate::code_location!())
            .with_created_now()
    };
    ($name:expr) => {
        $crate::DebugInfo::default()
            .with_name($name.to_string())
            .with_location($crate::code_location!())
            .with_created_now()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed() {
        let debug_info = DebugInfo::default();
        assert_eq!(debug_info.name(), "unnamed");
        assert_eq!(debug_info.to_string(), "\"unnamed\"");
    }

    #[test]
    fn macro_records_location() {
        let debug_info = debug_info!("main_window");
        let location = debug_info.location.unwrap();
        assert_eq!(debug_info.name(), "main_window");
        assert_eq!(location.function, "kairos_shared::debug_info::tests::macro_records_location");
        assert!(location.file.ends_with("debug_info.rs"));
        assert!(debug_info.created_instant.is_some());
    }

    #[test]
    fn owned_name() {
        let index = 3;
        let debug_info = debug_info!(format!("surface_{index}"));
        assert_eq!(debug_info.name(), "surface_3");
    }
}
