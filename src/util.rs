use regex::Regex;

pub use private::Never;
mod private {
    use std::process::{ExitCode, Termination};
    /// A type that cannot be constructed. Use as a return type for functions
    /// that never return.
    pub struct Never(());
    impl Termination for Never {
        fn report(self) -> ExitCode {
            ExitCode::FAILURE
        }
    }
}

pub trait ToError<E> {
    fn to_error(self) -> E;
}

impl<E> ToError<E> for Result<Never, E> {
    fn to_error(self) -> E {
        match self {
            Ok(_) => unsafe { std::hint::unreachable_unchecked() },
            Err(e) => e,
        }
    }
}

pub fn short_name<T: ?Sized>() -> String {
    abs_to_rel_paths(std::any::type_name::<T>())
}

fn abs_to_rel_paths(s: &str) -> String {
    let re = Regex::new("[_a-zA-Z0-9]*::").unwrap();
    re.replace_all(s, "").into()
}

#[test]
fn abs_to_rel_paths_works() {
    assert_eq!(
        "ConnectionService<CacheClient>",
        abs_to_rel_paths(
            "resource_frame::connection::ConnectionService<my_app::cache::CacheClient>"
        ),
    );
    assert_eq!(
        "ConnectionRegistry<Arc<dyn DocumentStore>>",
        abs_to_rel_paths(
            "resource_frame::registry::ConnectionRegistry<alloc::sync::Arc<dyn my_app::store::DocumentStore>>"
        ),
    );
    assert_eq!(
        "LoopingJobService",
        abs_to_rel_paths("resource_frame::service::LoopingJobService"),
    );
    assert_eq!(
        "(ScrapeJob, LoopConfig)",
        abs_to_rel_paths("(my_app::scraping::ScrapeJob, resource_frame::service::LoopConfig)"),
    );
}
