//! Per-layer reduction report

use std::{fs::File, io::Write, ops::Deref, path::Path};

use serde::{Deserialize, Serialize};

use crate::{psf::PsfSubtraction, sky::SkySubtraction};

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("Failed to create the report file")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize the report to CSV")]
    Csv(#[from] csv::Error),
}
type Result<T> = std::result::Result<T, ReportError>;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct LayerRecord {
    /// index of the layer in the input cube
    #[serde(rename = "Layer")]
    pub layer: usize,
    #[serde(rename = "Sky")]
    pub sky: f64,
    #[serde(rename = "Masked pixels")]
    pub n_masked: usize,
    #[serde(rename = "PSF scale")]
    pub psf_scale: Option<f64>,
}

/// Sky level, number of masked pixels and PSF scale of each layer
#[derive(Debug, Default, PartialEq)]
pub struct LayerReport(Vec<LayerRecord>);
impl Deref for LayerReport {
    type Target = Vec<LayerRecord>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl LayerReport {
    pub fn new(sky: &SkySubtraction, psf: Option<&PsfSubtraction>) -> Self {
        Self(
            sky.sky_values
                .iter()
                .zip(&sky.n_masked)
                .enumerate()
                .map(|(j, (&sky_value, &n_masked))| LayerRecord {
                    layer: sky.first_layer + j,
                    sky: sky_value,
                    n_masked,
                    psf_scale: psf.and_then(|psf| psf.scales.get(j).copied()),
                })
                .collect(),
        )
    }
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for record in self.iter() {
            wtr.serialize(record)?;
        }
        wtr.flush()?;
        Ok(())
    }
    /// Writes the report to a CSV file
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_writer(File::create(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cube::Datacube, psf::PsfSubtractor, sky::SkyEstimator};
    use ndarray::Array3;

    #[test]
    fn csv_report() {
        let sky = Datacube::new(Array3::from_shape_fn((5, 8, 8), |(l, row, col)| {
            1. + l as f64 + if (row, col) == (1, 1) { 50. } else { 0. }
        }))
        .unwrap();
        let science = Datacube::new(Array3::from_shape_fn((5, 8, 8), |(l, row, col)| {
            let (dx, dy) = (col as f64 - 4., row as f64 - 4.);
            1. + l as f64 + 10. * (-(dx * dx + dy * dy) / 2.).exp()
        }))
        .unwrap();
        let sky = SkyEstimator::default()
            .trim_layers(1)
            .estimate_and_subtract(&sky, &science)
            .unwrap();
        let psf = PsfSubtractor::new(2, 2)
            .subtract_point_source(&sky.science, None)
            .unwrap();
        let report = LayerReport::new(&sky, Some(&psf));
        assert_eq!(report.len(), 3);
        assert_eq!(report[0].layer, 1);
        assert_eq!(report[2].sky, 4.);
        assert_eq!(report[1].n_masked, 1);
        assert!(report.iter().all(|r| r.psf_scale.is_some()));

        let mut buffer = Vec::new();
        report.to_writer(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Layer,Sky,Masked pixels,PSF scale"));
        assert_eq!(lines.count(), 3);

        let records: Vec<LayerRecord> = csv::Reader::from_reader(text.as_bytes())
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(records, *report);
    }

    #[test]
    fn report_without_psf() {
        let cube = Datacube::new(Array3::from_elem((2, 3, 3), 2.)).unwrap();
        let sky = SkyEstimator::default()
            .estimate_and_subtract(&cube, &cube)
            .unwrap();
        let report = LayerReport::new(&sky, None);
        assert!(report.iter().all(|r| r.psf_scale.is_none() && r.sky == 2.));
    }
}
