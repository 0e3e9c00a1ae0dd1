use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use ifu_reduce::{
    align::{self, Shift},
    io::{self, Format, Header},
    CentroidFinder, EmptyLayerPolicy, Pipeline, PsfSubtractor, Reduction, ScaleMode, SkyEstimator,
    SourceLocation,
};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
struct SkyOpt {
    /// Minimum number of layers a pixel must be clipped in to be masked
    #[structopt(short, long, default_value = "1")]
    mask_limit: u32,
    /// Number of layers discarded at both ends of the cubes
    #[structopt(long, default_value = "300")]
    cut_ch: usize,
    /// Sigma clipping threshold
    #[structopt(long, default_value = "3")]
    sigma: f64,
    /// Maximum number of clipping iterations
    #[structopt(long, default_value = "10")]
    iterations: usize,
    /// Layers without any valid pixel get a zero sky level instead of failing
    #[structopt(long)]
    carry_forward: bool,
}
impl From<&SkyOpt> for SkyEstimator {
    fn from(opt: &SkyOpt) -> Self {
        SkyEstimator::new(opt.mask_limit)
            .trim_layers(opt.cut_ch)
            .sigma(opt.sigma)
            .iterations(opt.iterations)
            .empty_layer(if opt.carry_forward {
                EmptyLayerPolicy::CarryForward
            } else {
                EmptyLayerPolicy::Fail
            })
    }
}

#[derive(Debug, StructOpt)]
struct PsfOpt {
    /// Half width of the scaling cutout along the columns
    #[structopt(long, default_value = "8")]
    dpx: usize,
    /// Half width of the scaling cutout along the rows
    #[structopt(long, default_value = "10")]
    dpy: usize,
    /// Layer scaling: peak (p) or integrated (i)
    #[structopt(long, default_value = "integrated", parse(try_from_str = ScaleMode::parse))]
    scale: ScaleMode,
    /// Fraction of the median image peak used to locate the source
    #[structopt(long, default_value = "0.9")]
    peak_fraction: f64,
    /// Source column, located automatically if not set
    #[structopt(long)]
    source_x: Option<usize>,
    /// Source row, located automatically if not set
    #[structopt(long)]
    source_y: Option<usize>,
}
impl PsfOpt {
    fn subtractor(&self) -> PsfSubtractor {
        PsfSubtractor::new(self.dpx, self.dpy)
            .scale(self.scale)
            .peak_fraction(self.peak_fraction)
    }
    fn location(&self) -> anyhow::Result<Option<SourceLocation>> {
        match (self.source_x, self.source_y) {
            (Some(x), Some(y)) => Ok(Some(SourceLocation::new(x, y))),
            (None, None) => Ok(None),
            _ => anyhow::bail!("both --source-x and --source-y must be set"),
        }
    }
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ifu-reduce",
    about = "IFU datacubes sky background and point source subtraction"
)]
enum Opt {
    /// Sky subtraction of a science cube
    Sky {
        /// Science cube (.fits or .npy)
        #[structopt(long)]
        science: PathBuf,
        /// Sky cube (.fits or .npy)
        #[structopt(long)]
        sky: PathBuf,
        #[structopt(flatten)]
        sky_opt: SkyOpt,
        /// Output directory
        #[structopt(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Output format: fits or npy
        #[structopt(short, long, default_value = "fits")]
        format: Format,
    },
    /// Point source subtraction of a sky subtracted cube
    Psf {
        /// Sky subtracted cube (.fits or .npy)
        cube: PathBuf,
        #[structopt(flatten)]
        psf_opt: PsfOpt,
        /// Output cube (.fits or .npy)
        #[structopt(short, long, default_value = "img_psf.fits")]
        output: PathBuf,
    },
    /// Source centroid of a cube
    Center {
        /// Datacube (.fits or .npy)
        cube: PathBuf,
        /// Fraction of the median image peak
        #[structopt(long, default_value = "0.93")]
        peak_fraction: f64,
        /// Grid refinement factor
        #[structopt(long, default_value = "3")]
        refinement: usize,
    },
    /// Integer pixel shift of a cube
    Shift {
        /// Datacube (.fits or .npy)
        cube: PathBuf,
        /// Columns shift
        #[structopt(long, allow_hyphen_values = true)]
        dx: isize,
        /// Rows shift
        #[structopt(long, allow_hyphen_values = true)]
        dy: isize,
        /// Output cube (.fits or .npy)
        #[structopt(short, long, default_value = "img_shifted.fits")]
        output: PathBuf,
    },
    /// Sky and point source subtraction of a series of exposures
    Run {
        /// Science cubes (.fits or .npy)
        #[structopt(long, required = true)]
        science: Vec<PathBuf>,
        /// Sky cubes (.fits or .npy), one per science cube
        #[structopt(long, required = true)]
        sky: Vec<PathBuf>,
        #[structopt(flatten)]
        sky_opt: SkyOpt,
        #[structopt(flatten)]
        psf_opt: PsfOpt,
        /// Skips the point source subtraction
        #[structopt(long)]
        no_psf: bool,
        /// Aligns the reduced cubes onto the first exposure
        #[structopt(long)]
        align: bool,
        /// Output directory
        #[structopt(short, long, default_value = ".")]
        out_dir: PathBuf,
        /// Output format: fits or npy
        #[structopt(short, long, default_value = "fits")]
        format: Format,
    },
}

/// Reduced exposure kept for the alignment
struct Exposure {
    dir: PathBuf,
    header: Option<Header>,
    reduction: Reduction,
}

fn exposure_dir(out_dir: &Path, science: &Path) -> anyhow::Result<PathBuf> {
    let stem = science
        .file_stem()
        .with_context(|| format!("invalid science file name: {:?}", science))?;
    let dir = out_dir.join(stem);
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {:?}", dir))?;
    Ok(dir)
}

fn save(
    dir: &Path,
    format: Format,
    header: Option<&Header>,
    reduction: &Reduction,
) -> anyhow::Result<()> {
    io::write_mask(dir.join(format.file_name("mask")), reduction.mask())?;
    io::write_cube(
        dir.join(format.file_name("img")),
        &reduction.sky.science,
        header,
    )?;
    if let Some(psf) = &reduction.psf {
        io::write_cube(dir.join(format.file_name("img_psf")), &psf.cube, header)?;
    }
    reduction.report.to_csv(dir.join("layers.csv"))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Opt::from_args() {
        Opt::Sky {
            science,
            sky,
            sky_opt,
            out_dir,
            format,
        } => {
            let (science_cube, header) = io::read_cube(&science)?;
            let (sky_cube, _) = io::read_cube(&sky)?;
            let reduction =
                Pipeline::new(SkyEstimator::from(&sky_opt)).run(&sky_cube, &science_cube, None)?;
            let dir = exposure_dir(&out_dir, &science)?;
            save(&dir, format, header.as_ref(), &reduction)?;
            println!(
                "{} pixels masked over {} layers",
                reduction.mask().iter().filter(|&&m| m > 0).count(),
                reduction.report.len()
            );
        }
        Opt::Psf {
            cube,
            psf_opt,
            output,
        } => {
            let (cube, header) = io::read_cube(&cube)?;
            let psf = psf_opt
                .subtractor()
                .subtract_point_source(&cube, psf_opt.location()?)?;
            io::write_cube(&output, &psf.cube, header.as_ref())?;
            println!("source at {}", psf.location);
        }
        Opt::Center {
            cube,
            peak_fraction,
            refinement,
        } => {
            let (cube, _) = io::read_cube(&cube)?;
            let center = CentroidFinder::default()
                .peak_fraction(peak_fraction)
                .refinement(refinement)
                .find(&cube)?;
            println!("native grid : {}", center.native);
            println!("refined grid: {}", center.refined);
        }
        Opt::Shift {
            cube,
            dx,
            dy,
            output,
        } => {
            let (cube, header) = io::read_cube(&cube)?;
            let shifted = align::shift(&cube, Shift { dx, dy });
            io::write_cube(&output, &shifted, header.as_ref())?;
        }
        Opt::Run {
            science,
            sky,
            sky_opt,
            psf_opt,
            no_psf,
            align: align_cubes,
            out_dir,
            format,
        } => {
            anyhow::ensure!(
                science.len() == sky.len(),
                "{} science cubes for {} sky cubes",
                science.len(),
                sky.len()
            );
            let location = psf_opt.location()?;
            let mut pipeline = Pipeline::new(SkyEstimator::from(&sky_opt));
            if !no_psf {
                pipeline = pipeline.psf(psf_opt.subtractor());
            }

            let pb = ProgressBar::new(science.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                    )?
                    .progress_chars("#>-"),
            );
            let exposures = science
                .par_iter()
                .zip(&sky)
                .progress_with(pb.clone())
                .map(|(science, sky)| {
                    let (science_cube, header) = io::read_cube(science)?;
                    let (sky_cube, _) = io::read_cube(sky)?;
                    let reduction = pipeline
                        .run(&sky_cube, &science_cube, location)
                        .with_context(|| format!("failed to reduce {:?}", science))?;
                    let dir = exposure_dir(&out_dir, science)?;
                    save(&dir, format, header.as_ref(), &reduction)?;
                    Ok(align_cubes.then_some(Exposure {
                        dir,
                        header,
                        reduction,
                    }))
                })
                .collect::<anyhow::Result<Vec<Option<Exposure>>>>()?;
            pb.finish_with_message("done");

            let exposures: Vec<Exposure> = exposures.into_iter().flatten().collect();
            if let Some((reference, others)) = exposures.split_first() {
                let finder = CentroidFinder::default();
                others
                    .par_iter()
                    .map(|exposure| {
                        let aligned = exposure
                            .reduction
                            .align_to(&reference.reduction, &finder)
                            .with_context(|| format!("failed to align {:?}", exposure.dir))?;
                        log::info!("{:?} shifted by {}", exposure.dir, aligned.offset);
                        let header = exposure.header.as_ref();
                        io::write_cube(
                            exposure.dir.join(format.file_name("img_aligned")),
                            &aligned.sky,
                            header,
                        )?;
                        if let Some(psf) = &aligned.psf {
                            io::write_cube(
                                exposure.dir.join(format.file_name("img_psf_aligned")),
                                psf,
                                header,
                            )?;
                        }
                        Ok(())
                    })
                    .collect::<anyhow::Result<()>>()?;
            }
        }
    }

    Ok(())
}
