use soliguard::finding::VulnerabilityKind;
use soliguard::graph::EdgeKind;
use soliguard::scorer::{HeadParams, ModelStore};

/// The shipped parameter set. Values are calibration artifacts, not code:
/// decays control how far evidence travels per edge kind, head weights turn
/// accumulated evidence into logits.
#[derive(Debug, Clone)]
pub struct CalibratedStore {
    control_decay: f64,
    data_decay: f64,
    syntactic_decay: f64,
}

impl Default for CalibratedStore {
    fn default() -> Self {
        Self {
            control_decay: 0.6,
            data_decay: 0.7,
            syntactic_decay: 0.25,
        }
    }
}

impl ModelStore for CalibratedStore {
    fn edge_decay(&self, kind: EdgeKind) -> f64 {
        match kind {
            EdgeKind::ControlFlow => self.control_decay,
            EdgeKind::DataDependency => self.data_decay,
            EdgeKind::Syntactic => self.syntactic_decay,
        }
    }

    fn head(&self, kind: &VulnerabilityKind) -> Option<HeadParams> {
        let (bias, weights): (f64, Vec<f64>) = match kind {
            VulnerabilityKind::Reentrancy => (-4.0, vec![6.5, 0.8]),
            VulnerabilityKind::UncheckedCall => (-3.0, vec![5.5]),
            VulnerabilityKind::DelegateCall => (-3.0, vec![5.5]),
            VulnerabilityKind::TimestampDependence => (-3.2, vec![5.0]),
            VulnerabilityKind::IntegerOverflow => (-3.4, vec![5.2]),
            VulnerabilityKind::AccessControl => (-3.3, vec![5.0]),
            VulnerabilityKind::UnboundedLoop => (-3.5, vec![5.0]),
            VulnerabilityKind::Other(_) => return None,
        };
        Some(HeadParams { bias, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_covers_all_seeded_kinds() {
        let store = CalibratedStore::default();
        for kind in [
            VulnerabilityKind::Reentrancy,
            VulnerabilityKind::IntegerOverflow,
            VulnerabilityKind::AccessControl,
            VulnerabilityKind::UncheckedCall,
            VulnerabilityKind::TimestampDependence,
            VulnerabilityKind::DelegateCall,
            VulnerabilityKind::UnboundedLoop,
        ] {
            assert!(store.head(&kind).is_some(), "missing head for {kind:?}");
        }
        assert!(store.head(&VulnerabilityKind::Other("novel".into())).is_none());
    }
}
