// Logging that is visible in unit tests and free everywhere else.
#[macro_export]
macro_rules! trace(
    ( $($thing:expr),* ) => { if cfg!(test) { println! { $($thing),* } } };
);
