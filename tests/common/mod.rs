//! Test helpers shared by the unit, functional and integration suites.

#![allow(dead_code)]
