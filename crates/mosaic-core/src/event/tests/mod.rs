#![cfg(test)]

mod bus_tests;
