//! Timed assignment run over a synthetic town
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::time::Instant;

use geosynth::{
    engine::{EngineBuilder, EngineSettings, VacancyLayout},
    geo::{CellCoord, CellTable, GridGeometry},
    kernel::{AgeGroup, KernelParams, KernelTable},
    population::Population,
    venue::{FacilitySizeDistribution, SizeBin, VenueParams},
    SynthConfig,
};

#[cfg(test)]
mod benches {
    use super::*;

    const SIDE: u32 = 60;

    fn town() -> (CellTable, Population) {
        let geometry = GridGeometry {
            xll_corner: 7.0,
            yll_corner: 45.0,
            cell_size: 0.01,
            num_rows: SIDE,
        };
        let mut population = Population::new();
        let mut cells = Vec::new();
        for x in 0..SIDE {
            for y in 0..SIDE {
                let cell = CellCoord::new(x, y);
                let (lat, lon) = geometry.cell_center(cell);
                let households = 5 + (x * 7 + y * 13) % 20;
                for h in 0..households {
                    population.add_household(cell, lat, lon, &[30.0 + (h % 30) as f32, 45.0]);
                }
                cells.push((cell, households * 2));
            }
        }
        (CellTable::from_populations(geometry, cells).unwrap(), population)
    }

    #[test]
    fn benchmark_workplace_assignment() {
        let (cells, mut population) = town();
        let kernels = KernelTable::single(AgeGroup::new(18.0, 65.0), KernelParams::power(5.0, 2.5))
            .unwrap();
        let venue = FacilitySizeDistribution::new(
            vec![
                SizeBin { size: 1, cumulative: 0.0 },
                SizeBin { size: 10, cumulative: 0.7 },
                SizeBin { size: 100, cumulative: 0.95 },
                SizeBin { size: 1000, cumulative: 1.0 },
            ],
            VenueParams {
                host_age_group: 0,
                staff_age_group: 0,
                staff_ratio: 0.0,
                group_size: 10,
                fill_ratio: 0.8,
            },
        )
        .unwrap();
        let config = SynthConfig {
            patch_granularity: 6,
            ..SynthConfig::default()
        };
        let mut engine = EngineBuilder::new(EngineSettings::from_config(&config), cells, kernels)
            .with_venue(venue, VacancyLayout::PopulationDensity)
            .build()
            .unwrap();

        let started = Instant::now();
        let summary = engine.run(&mut population).unwrap();
        let elapsed = started.elapsed();
        black_box(&summary);

        let stats = &summary.epochs[0].primary;
        println!(
            "{} agents, {} facilities, {} accepted in {:?} on {} workers",
            population.len(),
            summary.epochs[0].facilities,
            stats.accepted,
            elapsed,
            config.workers
        );
        assert_eq!(
            (stats.accepted + stats.declined) as usize,
            population.len()
        );
    }
}
