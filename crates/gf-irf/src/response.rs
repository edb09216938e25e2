//! Full instrument response applied to a true-flux cube.

use std::sync::Arc;

use gf_core::{Error, Result};
use gf_maps::{Geometry, Map};

use crate::edisp::EDispKernel;
use crate::kernel::PsfKernel;
use crate::{ENERGY, ENERGY_TRUE};

/// Exposure plus optional PSF and energy dispersion.
///
/// [`IrfResponse::apply`] computes `EDISP(PSF * (flux x exposure))` for a
/// flux cube (photons cm^-2 s^-1 per pixel and true-energy bin) on the
/// exposure geometry.
#[derive(Debug, Clone)]
pub struct IrfResponse {
    exposure: Map,
    psf: Option<PsfKernel>,
    edisp: Option<EDispKernel>,
}

impl IrfResponse {
    /// Response from an exposure map with a single `energy_true` axis.
    pub fn new(exposure: Map, psf: Option<PsfKernel>, edisp: Option<EDispKernel>) -> Result<Self> {
        let geom = exposure.geom();
        if geom.axes().len() != 1 || geom.axis_index(ENERGY_TRUE).is_none() {
            return Err(Error::Validation("exposure must have exactly one axis named 'energy_true'".into()));
        }
        let axis = &geom.axes()[0];
        if let Some(p) = &psf {
            if !p.energy_axis().is_aligned(axis) {
                return Err(Error::GeometryMismatch("psf kernel energy axis does not match exposure".into()));
            }
        }
        if let Some(e) = &edisp {
            if !e.energy_true_axis().is_aligned(axis) {
                return Err(Error::GeometryMismatch("edisp true-energy axis does not match exposure".into()));
            }
        }
        Ok(Self { exposure, psf, edisp })
    }

    /// Exposure map (cm^2 s).
    pub fn exposure(&self) -> &Map {
        &self.exposure
    }

    /// PSF kernel, if any.
    pub fn psf(&self) -> Option<&PsfKernel> {
        self.psf.as_ref()
    }

    /// Energy dispersion kernel, if any.
    pub fn edisp(&self) -> Option<&EDispKernel> {
        self.edisp.as_ref()
    }

    /// Geometry in true energy (the exposure geometry).
    pub fn true_geom(&self) -> &Arc<Geometry> {
        self.exposure.geom()
    }

    /// Geometry of the predicted counts. Without energy dispersion the true
    /// axis is reused under the name `energy`.
    pub fn reco_geom(&self) -> Result<Geometry> {
        let axis = match &self.edisp {
            Some(e) => e.energy_axis().clone(),
            None => self.exposure.geom().axes()[0].renamed(ENERGY),
        };
        self.exposure.geom().to_cube(vec![axis])
    }

    /// Drop the energy dispersion.
    pub fn without_edisp(&self) -> Self {
        Self { edisp: None, ..self.clone() }
    }

    /// Predicted counts in reconstructed energy from a true-flux cube.
    pub fn apply(&self, flux: &Map) -> Result<Map> {
        let mut npred = flux.mul(&self.exposure)?;
        if let Some(psf) = &self.psf {
            npred = psf.convolve(&npred)?;
        }
        let mut npred = match &self.edisp {
            Some(edisp) => edisp.apply(&npred)?,
            None => {
                let geom = Arc::new(self.reco_geom()?);
                npred.with_geom(geom)?
            }
        };
        npred.set_unit("");
        Ok(npred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use gf_maps::{Frame, MapAxis, Projection, SkyCoord, WcsFootprint};

    fn exposure(value: f64) -> Map {
        let w = WcsFootprint::new(SkyCoord::new(0.0, 0.0), 0.02, (21, 21), Projection::Tan, Frame::Icrs).unwrap();
        let e = MapAxis::from_energy_bounds(1.0, 10.0, 3, "TeV", ENERGY_TRUE).unwrap();
        Map::full(Arc::new(Geometry::wcs(w, vec![e]).unwrap()), value, "cm2 s")
    }

    #[test]
    fn test_plain_exposure() {
        let r = IrfResponse::new(exposure(1e10), None, None).unwrap();
        let flux = Map::full(r.true_geom().clone(), 1e-10, "cm-2 s-1");
        let npred = r.apply(&flux).unwrap();
        assert_eq!(npred.geom().axes()[0].name(), ENERGY);
        assert_relative_eq!(npred.sum(), 3.0 * 441.0, max_relative = 1e-12);
    }

    #[test]
    fn test_full_chain_conserves_interior_point() {
        let exp = exposure(1.0);
        let e = exp.geom().axes()[0].clone();
        let psf = PsfKernel::from_gauss(&e, &[0.03, 0.03, 0.03], 0.02, 0.1, 2).unwrap();
        let edisp = EDispKernel::from_diagonal_response(&e, &e.renamed(ENERGY)).unwrap();
        let r = IrfResponse::new(exp, Some(psf), Some(edisp)).unwrap();
        let mut flux = Map::new(r.true_geom().clone(), "");
        flux.values_mut()[10 * 21 + 10] = 5.0;
        let npred = r.apply(&flux).unwrap();
        assert_relative_eq!(npred.sum(), 5.0, max_relative = 1e-12);
    }

    #[test]
    fn test_axis_mismatch_rejected() {
        let other = MapAxis::from_energy_bounds(1.0, 10.0, 4, "TeV", ENERGY_TRUE).unwrap();
        let psf = PsfKernel::from_gauss(&other, &[0.03; 4], 0.02, 0.1, 1).unwrap();
        assert!(IrfResponse::new(exposure(1.0), Some(psf), None).is_err());
    }
}
