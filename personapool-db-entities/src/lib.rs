#![allow(non_snake_case)]

pub mod Persona;
pub mod PoolLock;
