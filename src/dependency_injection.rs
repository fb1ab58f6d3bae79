pub trait Provides<T> {
    fn provide(&self) -> T;
}

impl<T: Clone> Provides<T> for T {
    fn provide(&self) -> T {
        self.clone()
    }
}

pub trait ProvideA {
    fn provide_a<T>(&self) -> T
    where
        Self: Provides<T>,
    {
        self.provide()
    }
}
impl<T> ProvideA for T {}

/// Implement constructors that can be used for dependency injection:
/// - impl From<&T> where T: Provides<FieldType> for every field
///
/// A component whose fields are all provided by the application (other
/// components, or connection services the app holds as `Arc` singletons) can
/// then be built with `app.provide()`.
#[macro_export]
macro_rules! inject {
    (
        $(#[$outer:meta])*
        pub struct $Name:ident {
            $($viz:vis $field:ident: $FieldType:ty),*$(,)?
        }
    ) => {
        $(#[$outer])*
        pub struct $Name {
            $($viz $field: $FieldType),*
        }
        impl<T> From<&T> for $Name where
            $(T: $crate::dependency_injection::Provides<$FieldType>),*
        {
            fn from(value: &T) -> Self {
                Self { $($field: value.provide()),* }
            }
        }
    };
}

/// Wires an application type into the provider graph.
///
/// - `init [...]`: jobs (implementing `Job`) that run once during startup,
///   after every bound resource has connected.
/// - `services [...]`: long-running workers, spawned once init completes.
///   Use `as WrapperType` when the type needs wrapping (via `From`) to
///   implement `Service`, e.g. `ScrapeJob as LoopingJobService`.
/// - `components [...]`: plain dependencies built from other provided items
///   with the `inject!` constructor. Use `as dyn SomeTrait` to also provide
///   the type as `Arc<dyn SomeTrait>`.
/// - `provided { ... }`: values that depend on state the application built by
///   hand. This is where connection services live: the build step binds them
///   asynchronously, the application stores the `Arc`, and providing is a
///   clone, so every consumer shares the one client the registry created.
///
/// ```text
/// provided {
///     Arc<ConnectionService<CacheClient>>: self.cache.clone(),
/// }
/// ```
#[macro_export]
macro_rules! application {
    (
        $self:ident: $Provider:ident
        $(init [
            $($Job:ty),*$(,)?
        ])?
        $(services [
            $($Svc:ty $(as $SvcAs:ty)?),*$(,)?
        ])?
        $(components [
            $($Component:ty $(as $CompAs:ty)?),+$(,)?
        ])?
        $(provided {
            $($($Provided:ty),+: $logic:expr),+$(,)?
        })?
    ) => {
        // Init
        $(
            $(
                impl $crate::dependency_injection::Provides<$Job> for $Provider {
                    fn provide(&self) -> $Job {
                        <$Job>::from(self)
                    }
                }
            )*
        )?
        impl $crate::service_manager::Initialize for $Provider {
            fn init(&$self) -> Vec<std::sync::Arc<dyn $crate::service::Job>> {
                #[allow(unused_imports)]
                use $crate::dependency_injection::Provides;
                #[allow(unused_mut)]
                let mut jobs: Vec<std::sync::Arc<dyn $crate::service::Job>> = vec![];
                $(
                    $(
                        let job: $Job = $self.provide();
                        jobs.push(std::sync::Arc::new(job));
                    )*
                )?
                jobs
            }
        }

        // Services
        $(
            $(
                impl $crate::dependency_injection::Provides<$Svc> for $Provider {
                    fn provide(&self) -> $Svc {
                        <$Svc>::from(self)
                    }
                }
            )*
        )?
        impl $crate::service_manager::Serves for $Provider {
            fn services(&$self) -> Vec<Box<dyn $crate::service::Service>> {
                #[allow(unused_imports)]
                use $crate::dependency_injection::Provides;
                #[allow(unused_mut)]
                let mut services: Vec<Box<dyn $crate::service::Service>> = vec![];
                $(
                    $(
                        let service: $Svc = $self.provide();
                        $(let service = <$SvcAs>::from(service);)?
                        services.push(Box::new(service));
                    )*
                )?
                services
            }
        }

        // Components
        $($(
            impl $crate::dependency_injection::Provides<$Component> for $Provider {
                fn provide(&self) -> $Component {
                    <$Component>::from(self)
                }
            }
            $(
                impl $crate::dependency_injection::Provides<std::sync::Arc<$CompAs>> for $Provider {
                    fn provide(&self) -> std::sync::Arc<$CompAs> {
                        std::sync::Arc::new(<$Component>::from(self))
                    }
                }
            )?
        )+)?
        // Provided
        $($($(
            impl $crate::dependency_injection::Provides<$Provided> for $Provider {
                fn provide(&$self) -> $Provided {
                    $logic
                }
            }
        )+)+)?
    }
}
