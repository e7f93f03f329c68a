use hifitime::{Epoch, TimeScale};
use std::str::FromStr;

use crate::constants::{HOURS_PER_DAY, JDTOMJD, MJD};
use crate::redcal_errors::RedcalError;

/// Transformation from a date in the format YYYY-MM-ddTHH:mm:ss (UTC) to modified julian date (MJD)
///
/// Argument
/// --------
/// * `date`: a date string in the format YYYY-MM-ddTHH:mm:ss, with optional fractional seconds
///
/// Return
/// ------
/// * the input date in modified julian date (MJD, UTC), or [`RedcalError::InvalidDate`]
pub fn date_to_mjd(date: &str) -> Result<MJD, RedcalError> {
    Epoch::from_str(date.trim())
        .map(|epoch| epoch.to_mjd_utc_days())
        .map_err(|_| RedcalError::InvalidDate(date.to_string()))
}

/// Transformation from a night label `YYYY-MM-DD` to the MJD of its civil midnight (UTC)
///
/// Night labels are compared lexically everywhere in the crate, so the label must be
/// zero-padded. This function doubles as the validator of that format.
///
/// Argument
/// --------
/// * `night`: a night label in the format YYYY-MM-DD
///
/// Return
/// ------
/// * the MJD of `night` at 00:00 UTC, or [`RedcalError::InvalidDate`]
pub fn night_to_mjd(night: &str) -> Result<MJD, RedcalError> {
    let invalid = || RedcalError::InvalidDate(night.to_string());

    let parts: Vec<&str> = night.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return Err(invalid());
    }

    let year = i32::from_str(parts[0]).map_err(|_| invalid())?;
    let month = u8::from_str(parts[1]).map_err(|_| invalid())?;
    let day = u8::from_str(parts[2]).map_err(|_| invalid())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }

    let epoch = Epoch::maybe_from_gregorian(year, month, day, 0, 0, 0, 0, TimeScale::UTC)
        .map_err(|_| invalid())?;
    Ok(epoch.to_mjd_utc_days())
}

/// Transformation from modified julian date (MJD) in julian date (JD)
pub fn mjd_to_jd(mjd: MJD) -> f64 {
    mjd + JDTOMJD
}

/// Transformation from julian date (JD) in modified julian date (MJD)
pub fn jd_to_mjd(jd: f64) -> MJD {
    jd - JDTOMJD
}

/// Convert a duration in hours to days, the unit of MJD differences.
#[inline]
pub fn hours_to_days(hours: f64) -> f64 {
    hours / HOURS_PER_DAY
}
