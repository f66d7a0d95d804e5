//! Helpers shared by the unit tests.
//!
//! A test owns one arena through [`test::TestContext`], builds a graph in a
//! session borrowed from it, and inspects the generated body as a list of
//! NASM lines.
