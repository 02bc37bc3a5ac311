use crate::engine::{Manifest, RawProgress};
use crate::Result;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedItem {
    pub manifest: Manifest,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(u8),
    ItemFinished(Box<FinishedItem>),
    Failed(String),
}

/// Percent for a `downloading` callback, or `None` when no usable total is known.
/// An exact total wins over an estimate; a zero total counts as absent.
pub fn percent(raw: &RawProgress) -> Option<u8> {
    let total = raw
        .total_bytes
        .filter(|t| *t > 0.0)
        .or(raw.total_bytes_estimate.filter(|t| *t > 0.0))?;
    let downloaded = raw.downloaded_bytes.unwrap_or(0.0).max(0.0);
    let pct = (downloaded * 100.0 / total).floor();
    Some(pct.clamp(0.0, 100.0) as u8)
}

/// Each item yields at most one `ItemFinished`; the sequence ends after the first `Failed`.
pub struct ProgressTranslator<I, P> {
    callbacks: I,
    probe: P,
    finished_keys: HashSet<String>,
    done: bool,
}

impl<I, P> ProgressTranslator<I, P>
where
    I: Iterator<Item = RawProgress>,
    P: FnMut(&RawProgress) -> Result<Manifest>,
{
    pub fn new(callbacks: I, probe: P) -> Self {
        Self {
            callbacks,
            probe,
            finished_keys: HashSet::new(),
            done: false,
        }
    }

    fn translate(&mut self, raw: RawProgress) -> Option<ProgressEvent> {
        match raw.status.as_deref() {
            Some("downloading") => percent(&raw).map(ProgressEvent::Progress),
            Some("finished") => {
                let key = raw.item_key().map(str::to_string);
                if let Some(key) = &key {
                    if self.finished_keys.contains(key) {
                        return None;
                    }
                }

                match (self.probe)(&raw) {
                    Ok(manifest) => {
                        if self.finished_keys.contains(&manifest.id) {
                            if let Some(key) = key {
                                self.finished_keys.insert(key);
                            }
                            return None;
                        }
                        let local_path = manifest
                            .filename
                            .clone()
                            .or_else(|| raw.filename.clone())
                            .map(PathBuf::from);
                        let local_path = match local_path {
                            Some(p) => p,
                            None => {
                                return Some(ProgressEvent::Failed(format!(
                                    "engine reported no output file for {}",
                                    manifest.id
                                )))
                            }
                        };
                        if let Some(key) = key {
                            self.finished_keys.insert(key);
                        }
                        self.finished_keys.insert(manifest.id.clone());
                        Some(ProgressEvent::ItemFinished(Box::new(FinishedItem {
                            manifest,
                            local_path,
                        })))
                    }
                    Err(e) => Some(ProgressEvent::Failed(e.to_string())),
                }
            }
            _ => None,
        }
    }
}

impl<I, P> Iterator for ProgressTranslator<I, P>
where
    I: Iterator<Item = RawProgress>,
    P: FnMut(&RawProgress) -> Result<Manifest>,
{
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        while let Some(raw) = self.callbacks.next() {
            if let Some(event) = self.translate(raw) {
                if matches!(event, ProgressEvent::Failed(_)) {
                    self.done = true;
                }
                return Some(event);
            }
        }
        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineError;

    fn manifest(id: &str, filename: Option<&str>) -> Manifest {
        Manifest {
            id: id.to_string(),
            title: "title".to_string(),
            description: String::new(),
            thumbnail: None,
            webpage_url: None,
            filename: filename.map(str::to_string),
            comments: None,
        }
    }

    #[test]
    fn percent_is_floor_of_ratio_and_clamped() {
        for (d, t) in [
            (0.0, 1.0),
            (1.0, 3.0),
            (2.0, 3.0),
            (50.0, 100.0),
            (999.0, 1000.0),
            (7.0, 7.0),
        ] {
            let raw = RawProgress::downloading(d, Some(t));
            let expected = (100.0 * d / t).floor() as u8;
            assert_eq!(percent(&raw), Some(expected), "{d}/{t}");
        }
        assert_eq!(percent(&RawProgress::downloading(150.0, Some(100.0))), Some(100));
        assert_eq!(percent(&RawProgress::downloading(-5.0, Some(100.0))), Some(0));
    }

    #[test]
    fn percent_requires_a_positive_total() {
        assert_eq!(percent(&RawProgress::downloading(50.0, None)), None);
        assert_eq!(percent(&RawProgress::downloading(50.0, Some(0.0))), None);

        let estimated = RawProgress {
            total_bytes: Some(0.0),
            total_bytes_estimate: Some(200.0),
            ..RawProgress::downloading(50.0, None)
        };
        assert_eq!(percent(&estimated), Some(25));

        let no_downloaded = RawProgress {
            downloaded_bytes: None,
            ..RawProgress::downloading(0.0, Some(10.0))
        };
        assert_eq!(percent(&no_downloaded), Some(0));
    }

    #[test]
    fn unknown_and_unsized_callbacks_yield_nothing() {
        let callbacks = vec![
            RawProgress::downloading(10.0, None),
            RawProgress {
                status: Some("error".to_string()),
                ..RawProgress::default()
            },
            RawProgress::default(),
            RawProgress::downloading(30.0, Some(60.0)),
        ];
        let events: Vec<_> =
            ProgressTranslator::new(callbacks.into_iter(), |_: &RawProgress| -> Result<Manifest> {
                panic!("no finished callback, probe must not run")
            })
            .collect();
        assert_eq!(events, vec![ProgressEvent::Progress(50)]);
    }

    #[test]
    fn finished_probes_and_prefers_manifest_path() {
        let callbacks = vec![
            RawProgress::downloading(50.0, Some(100.0)),
            RawProgress::finished("videos/Song.f137.mp4"),
        ];
        let events: Vec<_> = ProgressTranslator::new(callbacks.into_iter(), |_: &RawProgress| {
            Ok(manifest("abc", Some("videos/Song.mp4")))
        })
        .collect();

        assert_eq!(events.len(), 2);
        match &events[1] {
            ProgressEvent::ItemFinished(item) => {
                assert_eq!(item.manifest.id, "abc");
                assert_eq!(item.local_path, PathBuf::from("videos/Song.mp4"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn merged_streams_of_one_item_finish_once() {
        let mut first = RawProgress::finished("videos/Song.f137.mp4");
        first.item_id = Some("abc".to_string());
        let mut second = RawProgress::finished("videos/Song.f140.m4a");
        second.item_id = Some("abc".to_string());

        let mut probes = 0;
        let events: Vec<_> =
            ProgressTranslator::new(vec![first, second].into_iter(), |_: &RawProgress| {
                probes += 1;
                Ok(manifest("abc", None))
            })
            .collect();

        assert_eq!(events.len(), 1);
        assert_eq!(probes, 1);
        match &events[0] {
            ProgressEvent::ItemFinished(item) => {
                assert_eq!(item.local_path, PathBuf::from("videos/Song.f137.mp4"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn probe_failure_fails_and_ends_the_sequence() {
        let callbacks = vec![
            RawProgress::finished("videos/a.mp4"),
            RawProgress::downloading(10.0, Some(20.0)),
        ];
        let events: Vec<_> = ProgressTranslator::new(callbacks.into_iter(), |_: &RawProgress| {
            Err(EngineError::ProbeFailed("offline".to_string()))
        })
        .collect();

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProgressEvent::Failed(reason) if reason.contains("offline")));
    }
}
