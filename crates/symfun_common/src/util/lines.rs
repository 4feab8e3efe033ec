/// Joins string literals into one literal, terminating each with a newline.
#[macro_export]
macro_rules! lines {
    () => {
        ""
    };

    ($line:expr) => {
        concat!($line, "\n")
    };

    ($line:expr, $($tail:expr),* $(,)?) => {
        concat!(concat!($line, "\n"), $crate::lines!($($tail),*))
    };
}
