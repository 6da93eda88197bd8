//! Call-site surface
//!
//! `sitelog!` expands to a static site descriptor for the enclosing
//! source location plus a conditional emission. Arguments are captured
//! lazily: they are not evaluated unless the site is enabled for the
//! level.

/// Log through a static per-call-site descriptor.
///
/// ```
/// use sitelog::{sitelog, Level};
///
/// let answer = 42;
/// sitelog!(Level::Info, "answer is ", answer);
/// sitelog!(tag: "billing", Level::Warning, "retrying ", 3, " times");
/// ```
#[macro_export]
macro_rules! sitelog {
    (tag: $tag:expr, $level:expr, $($arg:expr),+ $(,)?) => {
        $crate::sitelog!(@emit $tag, $level, $($arg),+)
    };
    ($level:expr, $($arg:expr),+ $(,)?) => {
        $crate::sitelog!(@emit "untagged", $level, $($arg),+)
    };
    (@emit $tag:expr, $level:expr, $($arg:expr),+) => {{
        static SITE: $crate::site::SiteDescriptor = $crate::site::SiteDescriptor::with_emitter(
            &$crate::global::BOOTSTRAP_CELL,
            concat!(file!(), ":", line!()),
            module_path!(),
            $tag,
        );
        let level: $crate::levels::Level = $level;
        SITE.log(level, |message| {
            message.format((level, ": ", $($arg),+ ,));
        });
    }};
}

#[cfg(test)]
mod tests {
    use crate::levels::Level;

    // Expansion-only checks; routing through the global configuration is
    // covered by the integration tests.
    #[test]
    fn macro_accepts_expression_forms() {
        let count = 3_u32;
        sitelog!(Level::Verbose, "count ", count);
        sitelog!(Level::Verbose, "trailing comma ", count,);
        sitelog!(tag: "tagged", Level::Verbose, "tag form ", count);
    }
}
