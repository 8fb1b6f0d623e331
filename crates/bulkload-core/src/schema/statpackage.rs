//! Stat-package schema discovery
//!
//! The provider catalog is queried directly; there is no header concept.
//! Nullability comes from the provider-reported flag, never from a default.

use bulkload_common::Result;

use crate::notify::JobNotifier;
use crate::provider::StatPackageProvider;
use crate::schema::Column;

pub fn discover(
    provider: &mut dyn StatPackageProvider,
    default_width: u32,
    header_rows_to_skip: u32,
    notifier: &JobNotifier,
) -> Result<Vec<Column>> {
    if header_rows_to_skip > 0 {
        notifier.send(format!(
            "Warning: header_rows_to_skip has no effect for stat-package sources \
             (header_rows_to_skip = {header_rows_to_skip})"
        ));
    }

    Ok(provider
        .catalog()?
        .into_iter()
        .map(|entry| Column {
            name: entry.name,
            max_length: Some(default_width),
            nullable: entry.nullable,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifySink;
    use crate::provider::ProviderColumn;
    use crate::rows::{RowSource, VecRows};
    use std::path::Path;

    struct FakeStat {
        catalog: Vec<ProviderColumn>,
    }

    impl StatPackageProvider for FakeStat {
        fn catalog(&mut self) -> Result<Vec<ProviderColumn>> {
            Ok(self.catalog.clone())
        }

        fn rows(&mut self) -> Result<Box<dyn RowSource + Send>> {
            Ok(Box::new(VecRows::new(Vec::new())))
        }
    }

    #[test]
    fn test_nullability_comes_from_provider() {
        let mut provider = FakeStat {
            catalog: vec![
                ProviderColumn {
                    ordinal: 0,
                    name: "subject_id".into(),
                    width: Some(12),
                    nullable: false,
                },
                ProviderColumn {
                    ordinal: 1,
                    name: "visit".into(),
                    width: Some(8),
                    nullable: true,
                },
            ],
        };
        let notifier = JobNotifier::new(NotifySink::disabled(), "t", Path::new("t.sas7bdat"));
        let columns = discover(&mut provider, 1000, 0, &notifier).unwrap();
        assert!(!columns[0].nullable);
        assert!(columns[1].nullable);
        // provider widths are advisory; the default width applies
        assert_eq!(columns[0].max_length, Some(1000));
    }

    #[tokio::test]
    async fn test_skip_parameter_warns() {
        let mut provider = FakeStat { catalog: Vec::new() };
        let (sink, mut rx) = NotifySink::channel();
        let notifier = JobNotifier::new(sink, "t", Path::new("t.sas7bdat"));
        discover(&mut provider, 1000, 2, &notifier).unwrap();
        let event = rx.recv().await.unwrap();
        assert!(event.message.contains("no effect"));
    }
}
