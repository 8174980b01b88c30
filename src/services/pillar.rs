use chrono::{Datelike, NaiveDate};

use super::collaborators::PillarCalculator;
use crate::models::{Error, Pillar};

const STEMS: [&str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];
const BRANCHES: [&str; 12] = [
    "子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥",
];
const ELEMENTS: [&str; 5] = ["Wood", "Fire", "Earth", "Metal", "Water"];
const BRANCH_ANIMALS: [&str; 12] = [
    "Rat", "Ox", "Tiger", "Rabbit", "Dragon", "Snake", "Horse", "Goat", "Monkey", "Rooster",
    "Dog", "Pig",
];
const BRANCH_ELEMENTS: [usize; 12] = [4, 2, 0, 0, 2, 1, 1, 2, 3, 3, 2, 4];
// stem indexes, residual qi first and principal qi last
const HIDDEN_STEMS: [&[usize]; 12] = [
    &[8, 9],
    &[9, 7, 5],
    &[4, 2, 0],
    &[0, 1],
    &[1, 9, 4],
    &[4, 6, 2],
    &[2, 5, 3],
    &[3, 1, 5],
    &[4, 8, 6],
    &[6, 7],
    &[7, 3, 4],
    &[4, 0, 8],
];

/// Julian day number of 0001-01-01 minus one.
const JDN_CE_OFFSET: i64 = 1_721_425;

/// Day pillars of the sixty-day cycle, counted from the Julian day number.
#[derive(Debug, Clone, Copy, Default)]
pub struct SexagenaryCalculator;

impl SexagenaryCalculator {
    pub fn cycle_index(date: NaiveDate) -> usize {
        let jdn = i64::from(date.num_days_from_ce()) + JDN_CE_OFFSET;
        (jdn + 49).rem_euclid(60) as usize
    }
}

impl PillarCalculator for SexagenaryCalculator {
    fn compute_pillar(&self, date: NaiveDate) -> Result<Pillar, Error> {
        let idx = Self::cycle_index(date);
        let stem = idx % 10;
        let branch = idx % 12;
        let polarity = if stem % 2 == 0 { "Yang" } else { "Yin" };
        Ok(Pillar {
            heavenly_stem: STEMS[stem].to_owned(),
            earthly_branch: BRANCHES[branch].to_owned(),
            hidden_stems: HIDDEN_STEMS[branch]
                .iter()
                .map(|&s| STEMS[s].to_owned())
                .collect(),
            energy_description: format!(
                "{} {} over {} ({})",
                polarity,
                ELEMENTS[stem / 2],
                BRANCH_ANIMALS[branch],
                ELEMENTS[BRANCH_ELEMENTS[branch]]
            ),
        })
    }
}

#[tokio::test]
async fn pillar_of_known_day() -> anyhow::Result<()> {
    // arrange
    let date = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();

    // act
    let pillar = SexagenaryCalculator.compute_pillar(date)?;

    // assert
    assert_eq!("戊", pillar.heavenly_stem);
    assert_eq!("午", pillar.earthly_branch);
    assert_eq!(vec!["丙", "己", "丁"], pillar.hidden_stems);
    assert_eq!("Yang Earth over Horse (Fire)", pillar.energy_description);
    Ok(())
}

#[tokio::test]
async fn pillar_cycle_repeats_every_sixty_days() -> anyhow::Result<()> {
    // arrange
    let start = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

    // act & assert
    for offset in 0..60 {
        let day = start + chrono::Days::new(offset);
        let next = day + chrono::Days::new(1);
        let later = day + chrono::Days::new(60);
        assert_eq!(
            (SexagenaryCalculator::cycle_index(day) + 1) % 60,
            SexagenaryCalculator::cycle_index(next)
        );
        assert_eq!(
            SexagenaryCalculator.compute_pillar(day)?,
            SexagenaryCalculator.compute_pillar(later)?
        );
    }
    Ok(())
}
