//! Combinators over deferred outputs.
//!
//! Every derivation propagates the metadata structurally: secrecy is
//! monotonic, dependency sets union, and unknown short-circuits without
//! running user code on absent data.

use crate::core::error::{BoxError, Failure, RuntimeError};
use crate::core::output::{DependencySet, Output, OutputData};

impl<T: Clone + Send + Sync + 'static> Output<T> {
    /// Derive a new output by applying `transform` to the resolved value.
    /// If this output is unknown, the result is unknown and `transform` is
    /// never invoked. Metadata carries through unchanged.
    pub fn map<U, F>(&self, transform: F) -> Output<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let source = self.clone();
        let (output, resolver) = Output::pending();
        tokio::spawn(async move {
            match source.settle().await {
                Err(failure) => resolver.fail(failure),
                Ok(data) => {
                    let OutputData {
                        value,
                        secret,
                        depends_on,
                    } = data;
                    resolver.fulfill(OutputData {
                        value: value.map(transform),
                        secret,
                        depends_on,
                    });
                }
            }
        });
        output
    }

    /// As [`Output::map`], but the transform may fail; an `Err` fails the
    /// derived output.
    pub fn try_map<U, F, E>(&self, transform: F) -> Output<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
        E: Into<BoxError>,
    {
        let source = self.clone();
        let (output, resolver) = Output::pending();
        tokio::spawn(async move {
            match source.settle().await {
                Err(failure) => resolver.fail(failure),
                Ok(data) => {
                    let OutputData {
                        value,
                        secret,
                        depends_on,
                    } = data;
                    match value {
                        None => resolver.fulfill(OutputData {
                            value: None,
                            secret,
                            depends_on,
                        }),
                        Some(v) => match transform(v) {
                            Ok(mapped) => resolver.fulfill(OutputData {
                                value: Some(mapped),
                                secret,
                                depends_on,
                            }),
                            Err(err) => {
                                resolver.fail(RuntimeError::Transform(err.into()).shared());
                            }
                        },
                    }
                }
            }
        });
        output
    }
}

/// Join many outputs into one output of all their values.
///
/// Known iff every source is known; secret iff any source is secret;
/// dependencies are the union. Waits for every source to settle even after
/// one has failed, then surfaces the first failure.
pub fn all<T: Clone + Send + Sync + 'static>(sources: Vec<Output<T>>) -> Output<Vec<T>> {
    let (output, resolver) = Output::pending();
    tokio::spawn(async move {
        let mut values = Vec::with_capacity(sources.len());
        let mut secret = false;
        let mut depends_on = DependencySet::new();
        let mut known = true;
        let mut first_failure: Option<Failure> = None;

        for source in sources {
            match source.settle().await {
                Err(failure) => {
                    if first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
                Ok(data) => {
                    secret |= data.secret;
                    depends_on.extend(data.depends_on);
                    match data.value {
                        Some(value) => values.push(value),
                        None => known = false,
                    }
                }
            }
        }

        if let Some(failure) = first_failure {
            resolver.fail(failure);
        } else {
            resolver.fulfill(OutputData {
                value: known.then_some(values),
                secret,
                depends_on,
            });
        }
    });
    output
}

/// Join two outputs of different types with the same metadata rules as
/// [`all`].
pub fn zip<A, B>(left: &Output<A>, right: &Output<B>) -> Output<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    let left = left.clone();
    let right = right.clone();
    let (output, resolver) = Output::pending();
    tokio::spawn(async move {
        let left = left.settle().await;
        let right = right.settle().await;
        match (left, right) {
            (Err(failure), _) | (_, Err(failure)) => resolver.fail(failure),
            (Ok(a), Ok(b)) => {
                let mut depends_on = a.depends_on;
                depends_on.extend(b.depends_on);
                resolver.fulfill(OutputData {
                    value: a.value.zip(b.value),
                    secret: a.secret || b.secret,
                    depends_on,
                });
            }
        }
    });
    output
}
